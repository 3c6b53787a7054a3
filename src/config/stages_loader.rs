//! Carregador do catálogo de estágios de funil
//!
//! Cada recurso (leads, deals, ...) tem uma lista ordenada de estágios. Um
//! estágio agrupa um ou mais valores de status vindos do backend.
//! - Se STAGES_CONFIG_PATH estiver definido: lê o YAML do arquivo
//! - Caso contrário: usa o catálogo embutido

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::normalization::normalize_string;
use crate::utils::{AppError, AppResult};

const DEFAULT_STAGES_YAML: &str = r#"
funnels:
  leads:
    - key: novo
      label: Novo
      statuses: [new, novo, open]
    - key: contatado
      label: Contatado
      statuses: [contacted, contatado]
    - key: qualificado
      label: Qualificado
      statuses: [qualified, qualificado]
    - key: proposta
      label: Proposta
      statuses: [proposal, proposta]
    - key: convertido
      label: Convertido
      statuses: [converted, convertido, won, ganho]
  deals:
    - key: prospeccao
      label: Prospecção
      statuses: [prospecting, prospeccao]
    - key: qualificacao
      label: Qualificação
      statuses: [qualification, qualificacao]
    - key: proposta
      label: Proposta
      statuses: [proposal, proposta]
    - key: negociacao
      label: Negociação
      statuses: [negotiation, negociacao]
    - key: ganho
      label: Ganho
      statuses: [closed_won, won, ganho, fechado]
"#;

/// Um estágio do funil
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageDefinition {
    pub key: String,
    pub label: String,
    /// Status do backend que caem neste estágio (a própria key sempre conta)
    #[serde(default)]
    pub statuses: Vec<String>,
}

impl StageDefinition {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            statuses: Vec::new(),
        }
    }

    pub fn with_statuses(mut self, statuses: &[&str]) -> Self {
        self.statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Verifica se um status (já normalizado ou não) pertence ao estágio
    pub fn matches(&self, status: &str) -> bool {
        let status = normalize_string(status);
        normalize_string(&self.key) == status
            || self.statuses.iter().any(|s| normalize_string(s) == status)
    }
}

#[derive(Debug, Deserialize)]
struct StageCatalogueFile {
    #[serde(default)]
    funnels: HashMap<String, Vec<StageDefinition>>,
}

/// Catálogo completo: recurso → estágios ordenados
#[derive(Debug, Clone, Default)]
pub struct StageCatalogue {
    funnels: HashMap<String, Vec<StageDefinition>>,
}

impl StageCatalogue {
    /// Carrega de STAGES_CONFIG_PATH ou do catálogo embutido
    pub async fn load() -> AppResult<Self> {
        match std::env::var("STAGES_CONFIG_PATH") {
            Ok(path) => Self::load_from_file(&path).await,
            Err(_) => Self::embedded(),
        }
    }

    pub async fn load_from_file(path: &str) -> AppResult<Self> {
        tracing::info!("📂 Carregando catálogo de estágios de: {}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::ConfigError(format!("Erro ao ler arquivo {}: {}", path, e)))?;

        Self::parse_yaml(&content)
    }

    pub fn embedded() -> AppResult<Self> {
        Self::parse_yaml(DEFAULT_STAGES_YAML)
    }

    pub fn parse_yaml(content: &str) -> AppResult<Self> {
        let file: StageCatalogueFile = serde_yaml::from_str(content)?;

        for (resource, stages) in &file.funnels {
            if stages.is_empty() {
                return Err(AppError::ConfigError(format!(
                    "Funil '{}' sem estágios",
                    resource
                )));
            }
        }

        tracing::debug!("✅ Catálogo de estágios carregado: {} funis", file.funnels.len());

        Ok(Self {
            funnels: file.funnels,
        })
    }

    /// Estágios de um recurso (vazio se não configurado)
    pub fn stages_for(&self, resource: &str) -> &[StageDefinition] {
        self.funnels
            .get(resource)
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    pub fn insert(&mut self, resource: impl Into<String>, stages: Vec<StageDefinition>) {
        self.funnels.insert(resource.into(), stages);
    }
}
