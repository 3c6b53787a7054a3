//! Tipos de erro do núcleo analítico

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Sinais de falha transitória embutidos na mensagem de erro remota
/// (status 5xx, timeout, conexão resetada, falha de rede).
static TRANSIENT_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b5\d{2}\b|timed?\s*out|timeout|network|connection (reset|refused|closed)|econnreset|fetch failed|abort",
    )
    .expect("regex de erro transitório inválida")
});

/// Erros da fronteira de chamadas remotas (Retrying API Client)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Falha de transporte (DNS, conexão, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Tempo limite excedido
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Requisição abortada antes de completar
    #[error("Request aborted: {0}")]
    Aborted(String),

    /// Erro lógico devolvido pelo backend no campo `error` do envelope
    #[error("Remote error{}: {message}", code_suffix(.code))]
    Remote {
        code: Option<String>,
        message: String,
    },

    /// Resposta que não pôde ser interpretada
    #[error("Decode error: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl ApiError {
    /// Cria um erro remoto sem código
    pub fn remote(message: impl Into<String>) -> Self {
        ApiError::Remote {
            code: None,
            message: message.into(),
        }
    }

    /// Erros de rede/timeout/abort são transitórios; erros remotos só quando
    /// a mensagem carrega um sinal 5xx ou de rede.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::Aborted(_) => true,
            ApiError::Remote { code, message } => {
                let code_is_5xx = code
                    .as_deref()
                    .map(|c| c.len() == 3 && c.starts_with('5') && c.chars().all(|ch| ch.is_ascii_digit()))
                    .unwrap_or(false);
                code_is_5xx || TRANSIENT_SIGNAL.is_match(message)
            }
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Remote {
                code: Some(status.as_u16().to_string()),
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Erro de nível de aplicação
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
