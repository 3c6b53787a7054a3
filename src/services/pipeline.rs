//! Orquestração do dashboard: busca → agregação → store
//!
//! Um `StateStore` por recurso configurado. `refresh` dispara todas as buscas
//! em paralelo e só agrega depois do join (all-settled: uma falha não cancela
//! as outras). Eventos de realtime re-executam o pipeline do recurso tocado.
//! O resultado agregado de cada visão fica no cache por `cache.kpi_ttl_ms`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::aggregation::{compute_leaderboard, AggregationConfig};
use super::api_client::RetryingClient;
use super::cache::{kpi_view_key, TtlCache};
use super::data_source::{DataSource, EntityRepository};
use super::store::{Clock, StateStore, StoreSnapshot, StoreState};
use crate::config::{ResourceSettings, Settings, StageCatalogue};
use crate::models::{AggregationResult, FilterSpec, RankingEntry};
use crate::utils::logging::{
    log_fetch_failed, log_info, log_refresh_finished, log_refresh_started, log_warning,
};
use crate::utils::{ApiError, AppError, AppResult};

/// Notificação externa de que um recurso mudou no backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub resource: String,
}

impl ChangeEvent {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct DashboardPipeline {
    repository: EntityRepository,
    resources: Vec<ResourceSettings>,
    stores: Arc<HashMap<String, Mutex<StateStore>>>,
    debounce: Duration,
    kpi_ttl: Duration,
    realtime_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DashboardPipeline {
    pub fn new(repository: EntityRepository, settings: &Settings, catalogue: &StageCatalogue) -> Self {
        Self::with_clock(repository, settings, catalogue, Clock::System)
    }

    pub fn with_clock(
        repository: EntityRepository,
        settings: &Settings,
        catalogue: &StageCatalogue,
        clock: Clock,
    ) -> Self {
        let stores = settings
            .resources
            .iter()
            .map(|resource| {
                let config = AggregationConfig::from_settings(
                    &settings.analytics,
                    catalogue.stages_for(&resource.name).to_vec(),
                );
                let store = StateStore::new(&resource.name, config, settings.pagination.items_per_page)
                    .with_clock(clock);
                (resource.name.clone(), Mutex::new(store))
            })
            .collect();

        Self {
            repository,
            resources: settings.resources.clone(),
            stores: Arc::new(stores),
            debounce: Duration::from_millis(settings.realtime.debounce_ms),
            kpi_ttl: Duration::from_millis(settings.cache.kpi_ttl_ms),
            realtime_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Monta cache, cliente com retry e repositório a partir das configurações
    pub fn from_settings(source: Arc<dyn DataSource>, settings: &Settings, catalogue: &StageCatalogue) -> Self {
        let cache = TtlCache::new(settings.cache.namespace.clone());
        let client = RetryingClient::new(cache, settings.client.max_concurrency);
        let repository = EntityRepository::new(
            source,
            client,
            settings.client.clone(),
            settings.cache.clone(),
        );
        Self::new(repository, settings, catalogue)
    }

    pub fn repository(&self) -> &EntityRepository {
        &self.repository
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name.clone()).collect()
    }

    fn resource(&self, name: &str) -> AppResult<&ResourceSettings> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| AppError::UnknownResource(name.to_string()))
    }

    fn store(&self, name: &str) -> AppResult<&Mutex<StateStore>> {
        self.stores
            .get(name)
            .ok_or_else(|| AppError::UnknownResource(name.to_string()))
    }

    /// Acesso direto ao store (filtros, ordenação, paginação, subscribe)
    pub async fn with_store<R, F>(&self, resource: &str, f: F) -> AppResult<R>
    where
        F: FnOnce(&mut StateStore) -> R,
    {
        let mut store = self.store(resource)?.lock().await;
        Ok(f(&mut store))
    }

    pub async fn state(&self, resource: &str) -> AppResult<StoreState> {
        self.with_store(resource, |store| store.state().clone()).await
    }

    /// Snapshots na ordem em que os recursos foram configurados
    pub async fn snapshots(&self) -> Vec<StoreSnapshot> {
        let mut snapshots = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            if let Ok(store) = self.store(&resource.name) {
                snapshots.push(store.lock().await.snapshot());
            }
        }
        snapshots
    }

    /// Atualiza todos os recursos configurados
    pub async fn refresh(&self) -> RefreshSummary {
        let names = self.resource_names();
        // todos os nomes vêm da configuração
        self.refresh_resources(&names).await.unwrap_or_default()
    }

    pub async fn refresh_resource(&self, resource: &str) -> AppResult<RefreshSummary> {
        self.refresh_resources(&[resource.to_string()]).await
    }

    /// Fan-out das buscas, join, e só então grava cada resultado no seu store
    pub async fn refresh_resources(&self, names: &[String]) -> AppResult<RefreshSummary> {
        let resources = names
            .iter()
            .map(|name| self.resource(name))
            .collect::<AppResult<Vec<_>>>()?;

        log_refresh_started(resources.len());

        for resource in &resources {
            self.store(&resource.name)?.lock().await.set_loading(true);
        }

        let fetches = resources.iter().map(|resource| async move {
            let started = Instant::now();
            let result = self.repository.fetch(resource, &FilterSpec::new()).await;
            (*resource, result, started.elapsed())
        });
        let results = join_all(fetches).await;

        let mut summary = RefreshSummary::default();
        for (resource, result, elapsed) in results {
            let mut store = self.store(&resource.name)?.lock().await;
            match result {
                Ok(entities) => {
                    log_refresh_finished(&resource.name, entities.len(), elapsed.as_millis() as u64);
                    let key = kpi_view_key(&resource.name, &store.state().filters, store.config().window_days);
                    match self.cached_kpis(&key).await {
                        Some(result) => store.load_precomputed(entities, result),
                        None => {
                            store.load(entities);
                            self.cache_kpis(&key, &store.state().aggregation_result).await;
                        }
                    }
                    summary.refreshed.push(resource.name.clone());
                }
                Err(e) => {
                    log_fetch_failed(&resource.name, &e.to_string());
                    store.record_failure(e.to_string());
                    summary.failed.push(resource.name.clone());
                }
            }
        }

        Ok(summary)
    }

    async fn cached_kpis(&self, key: &str) -> Option<AggregationResult> {
        let value = self.repository.client().cache().get(key).await?;
        serde_json::from_value(value).ok()
    }

    async fn cache_kpis(&self, key: &str, result: &AggregationResult) {
        match serde_json::to_value(result) {
            Ok(value) => self.repository.client().cache().set(key, value, self.kpi_ttl).await,
            Err(e) => log_warning(&format!("⚠️ KPIs não serializáveis para o cache: {}", e)),
        }
    }

    pub async fn create(&self, resource: &str, payload: &Value) -> AppResult<Value> {
        let settings = self.resource(resource)?;
        let result = self.repository.create(settings, payload).await;
        self.after_mutation(resource, "criar", result).await
    }

    pub async fn update(&self, resource: &str, id: &str, patch: &Value) -> AppResult<Value> {
        let settings = self.resource(resource)?;
        let result = self.repository.update(settings, id, patch).await;
        self.after_mutation(resource, "atualizar", result).await
    }

    pub async fn delete(&self, resource: &str, id: &str) -> AppResult<Value> {
        let settings = self.resource(resource)?;
        let result = self.repository.delete(settings, id).await;
        self.after_mutation(resource, "excluir", result).await
    }

    /// Falha: só registra a mensagem, entidades locais ficam intactas.
    /// Sucesso: re-executa o pipeline do recurso (cache já invalidado).
    async fn after_mutation(
        &self,
        resource: &str,
        action: &str,
        result: Result<Value, ApiError>,
    ) -> AppResult<Value> {
        match result {
            Ok(value) => {
                self.refresh_resource(resource).await?;
                Ok(value)
            }
            Err(e) => {
                let message = format!("Não foi possível {} em '{}': {}", action, resource, e);
                log_warning(&format!("⚠️ {}", message));
                self.store(resource)?.lock().await.record_failure(message);
                Err(AppError::Api(e))
            }
        }
    }

    /// Ranking de pontos usando o campo de valor do recurso
    pub async fn leaderboard(&self, resource: &str) -> AppResult<Vec<RankingEntry>> {
        let points_field = self.resource(resource)?.value_field.clone();
        self.with_store(resource, |store| {
            compute_leaderboard(&store.state().filtered_entities, &points_field)
        })
        .await
    }

    /// Reage a mudanças externas: agrupa rajadas dentro da janela de debounce,
    /// invalida o cache dos recursos tocados e re-executa o pipeline deles.
    pub async fn spawn_realtime_listener(&self, mut events: mpsc::Receiver<ChangeEvent>) {
        let pipeline = self.clone();
        let debounce = self.debounce;

        let handle = tokio::spawn(async move {
            while let Some(first) = events.recv().await {
                let mut pending = BTreeSet::from([first.resource]);
                let mut closed = false;

                loop {
                    match tokio::time::timeout(debounce, events.recv()).await {
                        Ok(Some(event)) => {
                            pending.insert(event.resource);
                        }
                        Ok(None) => {
                            closed = true;
                            break;
                        }
                        Err(_) => break,
                    }
                }

                pipeline.apply_changes(pending).await;
                if closed {
                    break;
                }
            }
            log_info("🔌 Canal de realtime encerrado");
        });

        if let Some(previous) = self.realtime_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn apply_changes(&self, pending: BTreeSet<String>) {
        let mut names = Vec::with_capacity(pending.len());
        for name in pending {
            match self.resource(&name) {
                Ok(resource) => {
                    self.repository.invalidate(resource).await;
                    names.push(name);
                }
                Err(_) => log_warning(&format!("⚠️ Evento de realtime para recurso desconhecido: {}", name)),
            }
        }

        if names.is_empty() {
            return;
        }
        if let Err(e) = self.refresh_resources(&names).await {
            log_warning(&format!("⚠️ Refresh via realtime falhou: {}", e));
        }
    }

    /// Encerra o pipeline: para o listener de realtime, descarta stores e cache
    pub async fn dispose(&self) {
        if let Some(handle) = self.realtime_task.lock().await.take() {
            handle.abort();
        }
        for store in self.stores.values() {
            store.lock().await.dispose();
        }
        self.repository.client().cache().clear().await;
        log_info("🛑 Pipeline do dashboard encerrado");
    }
}
