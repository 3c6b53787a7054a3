//! Colaborador de dados (backend) e repositório com cache
//!
//! `DataSource` é a fronteira com o backend: devolve respostas cruas
//! (valor puro ou envelope). `EntityRepository` coloca o cliente com retry
//! e o cache TTL na frente e invalida as chaves afetadas a cada mutação.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::api_client::{CallContext, CallOptions, RemoteResponse, RetryingClient};
use super::cache::{kpi_key, resource_key, resource_prefix};
use crate::config::{CacheSettings, ClientSettings, ResourceSettings};
use crate::models::entity::value_to_string;
use crate::models::{entities_from_value, Entity, FilterSpec};
use crate::utils::ApiError;

pub type RemoteResult = Result<RemoteResponse, ApiError>;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_entities(&self, resource: &ResourceSettings, filters: &FilterSpec) -> RemoteResult;

    async fn create_entity(&self, resource: &ResourceSettings, payload: &Value) -> RemoteResult;

    async fn update_entity(&self, resource: &ResourceSettings, id: &str, patch: &Value) -> RemoteResult;

    async fn delete_entity(&self, resource: &ResourceSettings, id: &str) -> RemoteResult;
}

/// Repositório de entidades: leitura com cache, mutações com invalidação
#[derive(Clone)]
pub struct EntityRepository {
    source: Arc<dyn DataSource>,
    client: RetryingClient,
    client_settings: ClientSettings,
    cache_settings: CacheSettings,
}

impl EntityRepository {
    pub fn new(
        source: Arc<dyn DataSource>,
        client: RetryingClient,
        client_settings: ClientSettings,
        cache_settings: CacheSettings,
    ) -> Self {
        Self {
            source,
            client,
            client_settings,
            cache_settings,
        }
    }

    pub fn client(&self) -> &RetryingClient {
        &self.client
    }

    fn options(&self) -> CallOptions {
        CallOptions::from_settings(&self.client_settings, &self.cache_settings)
    }

    pub async fn fetch(&self, resource: &ResourceSettings, filters: &FilterSpec) -> Result<Vec<Entity>, ApiError> {
        let options = self.options().cached(resource_key(&resource.name, filters));
        let context = CallContext::new(
            format!("fetch_{}", resource.name),
            json!({ "filters": filters.cache_fragment() }),
        );

        let data = self
            .client
            .execute(context, &options, || self.source.fetch_entities(resource, filters))
            .await?;

        Ok(entities_from_value(&data, resource))
    }

    pub async fn create(&self, resource: &ResourceSettings, payload: &Value) -> Result<Value, ApiError> {
        let context = CallContext::new(format!("create_{}", resource.name), payload.clone());
        let data = self
            .client
            .execute(context, &self.options().without_cache(), || {
                self.source.create_entity(resource, payload)
            })
            .await?;

        self.invalidate(resource).await;
        Ok(data)
    }

    pub async fn update(&self, resource: &ResourceSettings, id: &str, patch: &Value) -> Result<Value, ApiError> {
        let context = CallContext::new(
            format!("update_{}", resource.name),
            json!({ "id": id, "patch": patch }),
        );
        let data = self
            .client
            .execute(context, &self.options().without_cache(), || {
                self.source.update_entity(resource, id, patch)
            })
            .await?;

        self.invalidate(resource).await;
        Ok(data)
    }

    pub async fn delete(&self, resource: &ResourceSettings, id: &str) -> Result<Value, ApiError> {
        let context = CallContext::new(format!("delete_{}", resource.name), json!({ "id": id }));
        let data = self
            .client
            .execute(context, &self.options().without_cache(), || {
                self.source.delete_entity(resource, id)
            })
            .await?;

        self.invalidate(resource).await;
        Ok(data)
    }

    /// Remove listagens (qualquer filtro) e KPIs do recurso
    pub async fn invalidate(&self, resource: &ResourceSettings) {
        let cache = self.client.cache();
        cache.invalidate(&resource_prefix(&resource.name)).await;
        cache.invalidate(&kpi_key(&resource.name)).await;
    }
}

/// Fonte de dados em memória, com falhas injetáveis
#[derive(Default)]
pub struct InMemoryDataSource {
    tables: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    failures: Mutex<HashMap<String, VecDeque<ApiError>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitui as linhas de um recurso
    pub fn seed(&self, resource: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        lock(&self.tables).insert(resource.to_string(), rows);
    }

    /// Próximas chamadas ao recurso falham com estes erros, em ordem
    pub fn fail_next(&self, resource: &str, errors: Vec<ApiError>) {
        lock(&self.failures)
            .entry(resource.to_string())
            .or_default()
            .extend(errors);
    }

    /// Quantas chamadas (qualquer operação) o recurso recebeu
    pub fn calls(&self, resource: &str) -> usize {
        lock(&self.calls).get(resource).copied().unwrap_or(0)
    }

    pub fn rows(&self, resource: &str) -> Vec<Map<String, Value>> {
        lock(&self.tables).get(resource).cloned().unwrap_or_default()
    }

    fn begin_call(&self, resource: &str) -> Result<(), ApiError> {
        *lock(&self.calls).entry(resource.to_string()).or_insert(0) += 1;
        match lock(&self.failures).get_mut(resource).and_then(|q| q.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn fetch_entities(&self, resource: &ResourceSettings, filters: &FilterSpec) -> RemoteResult {
        self.begin_call(&resource.name)?;

        let rows: Vec<Value> = self
            .rows(&resource.name)
            .into_iter()
            .filter(|row| filters.matches(&Entity::from_row(row, resource)))
            .map(Value::Object)
            .collect();

        Ok(RemoteResponse::ok(Value::Array(rows)))
    }

    async fn create_entity(&self, resource: &ResourceSettings, payload: &Value) -> RemoteResult {
        self.begin_call(&resource.name)?;

        let Some(mut row) = payload.as_object().cloned() else {
            return Ok(RemoteResponse::err("payload deve ser um objeto", Some("22P02")));
        };
        row.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));

        lock(&self.tables)
            .entry(resource.name.clone())
            .or_default()
            .push(row.clone());

        Ok(RemoteResponse::ok(Value::Object(row)))
    }

    async fn update_entity(&self, resource: &ResourceSettings, id: &str, patch: &Value) -> RemoteResult {
        self.begin_call(&resource.name)?;

        let mut tables = lock(&self.tables);
        let row = tables
            .get_mut(&resource.name)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").map(value_to_string).as_deref() == Some(id))
            });

        match (row, patch.as_object()) {
            (Some(row), Some(patch)) => {
                for (k, v) in patch {
                    row.insert(k.clone(), v.clone());
                }
                Ok(RemoteResponse::ok(Value::Object(row.clone())))
            }
            (None, _) => Ok(RemoteResponse::err(format!("registro {} não encontrado", id), Some("PGRST116"))),
            (_, None) => Ok(RemoteResponse::err("patch deve ser um objeto", Some("22P02"))),
        }
    }

    async fn delete_entity(&self, resource: &ResourceSettings, id: &str) -> RemoteResult {
        self.begin_call(&resource.name)?;

        let mut tables = lock(&self.tables);
        let rows = tables.entry(resource.name.clone()).or_default();
        let before = rows.len();
        rows.retain(|r| r.get("id").map(value_to_string).as_deref() != Some(id));

        if rows.len() == before {
            return Ok(RemoteResponse::err(format!("registro {} não encontrado", id), Some("PGRST116")));
        }
        Ok(RemoteResponse::ok(json!({ "id": id })))
    }
}
