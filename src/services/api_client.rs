//! Cliente de API com fila, retry exponencial e cache
//!
//! Toda chamada remota passa por aqui:
//! 1. Se `use_cache` e houver entrada válida → retorna sem rede
//! 2. Aguarda vaga na fila (no máximo `max_concurrency` chamadas em voo)
//! 3. Executa; normaliza valor puro ou envelope `{data, error}` em `Result`
//! 4. Erro transitório → retry com backoff `base * 2^tentativa`
//! 5. Esgotou as tentativas ou erro lógico → reporta e devolve o erro original

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};

use super::cache::TtlCache;
use crate::config::{CacheSettings, ClientSettings};
use crate::utils::logging::{log_call_failed, log_retry_scheduled};
use crate::utils::ApiError;

/// Corpo de erro devolvido pelo backend dentro do envelope
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl From<RemoteErrorBody> for ApiError {
    fn from(body: RemoteErrorBody) -> Self {
        let message = match body.details {
            Some(details) if !details.is_empty() => format!("{} ({})", body.message, details),
            _ => body.message,
        };
        ApiError::Remote {
            code: body.code,
            message,
        }
    }
}

/// Resposta crua de um colaborador remoto
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    /// Valor devolvido diretamente
    Bare(Value),
    /// Envelope `{ data, error }`
    Envelope {
        data: Option<Value>,
        error: Option<RemoteErrorBody>,
    },
}

impl RemoteResponse {
    pub fn ok(data: Value) -> Self {
        RemoteResponse::Envelope {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>, code: Option<&str>) -> Self {
        RemoteResponse::Envelope {
            data: None,
            error: Some(RemoteErrorBody {
                message: message.into(),
                code: code.map(|c| c.to_string()),
                details: None,
            }),
        }
    }

    /// Detecta o formato de um JSON arbitrário: objeto cujas chaves são só
    /// `data`/`error` (e metadados como `count`/`status`) é envelope.
    pub fn from_json(value: Value) -> Self {
        const ENVELOPE_KEYS: [&str; 5] = ["data", "error", "count", "status", "statusText"];

        let mut map = match value {
            Value::Object(map)
                if (map.contains_key("data") || map.contains_key("error"))
                    && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) =>
            {
                map
            }
            other => return RemoteResponse::Bare(other),
        };

        let data = map.remove("data").filter(|d| !d.is_null());
        let error = map.remove("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(message) => Some(RemoteErrorBody {
                message,
                code: None,
                details: None,
            }),
            other => Some(
                serde_json::from_value::<RemoteErrorBody>(other.clone()).unwrap_or(RemoteErrorBody {
                    message: other.to_string(),
                    code: None,
                    details: None,
                }),
            ),
        });

        RemoteResponse::Envelope { data, error }
    }

    /// Normaliza para o tipo discriminado único
    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            RemoteResponse::Bare(value) => Ok(value),
            RemoteResponse::Envelope {
                error: Some(error), ..
            } => Err(error.into()),
            RemoteResponse::Envelope { data, error: None } => Ok(data.unwrap_or(Value::Null)),
        }
    }
}

/// Contexto da chamada, repassado ao reporter em falhas terminais
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub function: String,
    pub args: Value,
}

impl CallContext {
    pub fn new(function: impl Into<String>, args: Value) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

/// Falha terminal com contexto completo
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub function: String,
    pub args: Value,
    pub retries: u32,
}

/// Colaborador de rastreamento de erros
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ApiError, report: &FailureReport);
}

/// Reporter padrão: só loga via tracing
#[derive(Debug, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &ApiError, report: &FailureReport) {
        tracing::error!(
            function = %report.function,
            args = %report.args,
            retries = report.retries,
            "🚨 Falha terminal reportada: {}",
            error
        );
    }
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub use_cache: bool,
    pub cache_key: Option<String>,
    pub cache_ttl: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl CallOptions {
    pub fn from_settings(client: &ClientSettings, cache: &CacheSettings) -> Self {
        Self {
            use_cache: false,
            cache_key: None,
            cache_ttl: Duration::from_millis(cache.default_ttl_ms),
            max_retries: client.max_retries,
            backoff_base: Duration::from_millis(client.backoff_base_ms),
        }
    }

    pub fn cached(mut self, key: impl Into<String>) -> Self {
        self.use_cache = true;
        self.cache_key = Some(key.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Atraso antes da tentativa `attempt + 1` (attempt começa em 0)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default(), &CacheSettings::default())
    }
}

#[derive(Clone)]
pub struct RetryingClient {
    cache: TtlCache<Value>,
    queue: Arc<Semaphore>,
    max_concurrency: usize,
    retry_counts: Arc<RwLock<HashMap<String, u32>>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl RetryingClient {
    pub fn new(cache: TtlCache<Value>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            cache,
            queue: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            retry_counts: Arc::new(RwLock::new(HashMap::new())),
            reporter: Arc::new(TracingErrorReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cache(&self) -> &TtlCache<Value> {
        &self.cache
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Retries pendentes da chave (zerado a cada sucesso)
    pub async fn retry_count(&self, key: &str) -> u32 {
        self.retry_counts.read().await.get(key).copied().unwrap_or(0)
    }

    pub async fn execute<F, Fut>(
        &self,
        context: CallContext,
        options: &CallOptions,
        call: F,
    ) -> Result<Value, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<RemoteResponse, ApiError>>,
    {
        let cache_key = options.cache_key.as_deref();

        if options.use_cache {
            if let Some(key) = cache_key {
                if let Some(cached) = self.cache.get(key).await {
                    return Ok(cached);
                }
            }
        }

        let counter_key = cache_key.unwrap_or(&context.function).to_string();
        let mut attempt: u32 = 0;

        loop {
            let outcome = {
                // vaga na fila só durante a chamada; o backoff não segura permit
                let _permit = self
                    .queue
                    .acquire()
                    .await
                    .map_err(|_| ApiError::Aborted("fila de requisições fechada".to_string()))?;
                call().await.and_then(RemoteResponse::into_result)
            };

            match outcome {
                Ok(data) => {
                    if options.use_cache {
                        if let Some(key) = cache_key {
                            self.cache.set(key, data.clone(), options.cache_ttl).await;
                        }
                    }
                    self.retry_counts.write().await.remove(&counter_key);
                    return Ok(data);
                }
                Err(error) if error.is_transient() && attempt < options.max_retries => {
                    let backoff = options.backoff_for(attempt);
                    attempt += 1;
                    self.retry_counts
                        .write()
                        .await
                        .insert(counter_key.clone(), attempt);

                    log_retry_scheduled(
                        &context.function,
                        attempt,
                        options.max_retries,
                        backoff.as_millis() as u64,
                        &error.to_string(),
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    self.retry_counts.write().await.remove(&counter_key);
                    log_call_failed(&context.function, attempt, &error.to_string());
                    self.reporter.report(
                        &error,
                        &FailureReport {
                            function: context.function.clone(),
                            args: context.args.clone(),
                            retries: attempt,
                        },
                    );
                    return Err(error);
                }
            }
        }
    }
}
