//! State Store por recurso
//!
//! Guarda entidades brutas, filtros, ordenação, a visão filtrada, o resultado
//! agregado e o estado de carregamento/erro. Toda transição notifica os
//! listeners com `(novo, anterior)`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::aggregation::{aggregate, AggregationConfig};
use crate::models::{
    filter_and_sort, AggregationResult, Entity, Filter, FilterSpec, Pagination, SortDirection, SortSpec,
};
use crate::utils::logging::log_listener_panicked;

/// Fonte do "agora" usado nas janelas de tempo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreState {
    pub resource: String,
    pub raw_entities: Vec<Entity>,
    pub filters: FilterSpec,
    pub sort: Option<SortSpec>,
    pub filtered_entities: Vec<Entity>,
    pub aggregation_result: AggregationResult,
    pub loading: bool,
    pub error: Option<String>,
    pub pagination: Pagination,
    /// Filtros/ordenação mudaram e a visão ainda não foi refeita
    pub dirty: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StoreState {
    fn new(resource: String, items_per_page: usize) -> Self {
        Self {
            resource,
            raw_entities: Vec::new(),
            filters: FilterSpec::new(),
            sort: None,
            filtered_entities: Vec::new(),
            aggregation_result: AggregationResult::default(),
            loading: false,
            error: None,
            pagination: Pagination::new(items_per_page),
            dirty: false,
            last_updated: None,
        }
    }
}

/// O que o colaborador de renderização consome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub resource: String,
    #[serde(flatten)]
    pub aggregation: AggregationResult,
    pub pagination: Pagination,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub type Listener = Arc<dyn Fn(&StoreState, &StoreState) + Send + Sync>;

pub struct StateStore {
    state: StoreState,
    config: AggregationConfig,
    clock: Clock,
    listeners: Vec<(Uuid, Listener)>,
}

impl StateStore {
    pub fn new(resource: impl Into<String>, config: AggregationConfig, items_per_page: usize) -> Self {
        Self {
            state: StoreState::new(resource.into(), items_per_page),
            config,
            clock: Clock::System,
            listeners: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            resource: self.state.resource.clone(),
            aggregation: self.state.aggregation_result.clone(),
            pagination: self.state.pagination,
            error: self.state.error.clone(),
            last_updated: self.state.last_updated,
        }
    }

    /// Registra listener; o id devolvido serve para `unsubscribe`
    pub fn subscribe<F>(&mut self, listener: F) -> Uuid
    where
        F: Fn(&StoreState, &StoreState) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        before != self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.transition(|state| state.loading = loading);
    }

    /// Novo snapshot do backend: limpa o erro, refaz a visão e recalcula
    pub fn load(&mut self, entities: Vec<Entity>) {
        let now = self.clock.now();
        let config = self.config.clone();
        self.transition(|state| {
            state.raw_entities = entities;
            state.loading = false;
            state.error = None;
            state.last_updated = Some(now);
            rebuild_view(state);
            state.aggregation_result = aggregate(&state.filtered_entities, now, &config);
        });
    }

    /// Como `load`, mas reaproveita um resultado já agregado para a mesma visão
    pub fn load_precomputed(&mut self, entities: Vec<Entity>, result: AggregationResult) {
        let now = self.clock.now();
        self.transition(|state| {
            state.raw_entities = entities;
            state.loading = false;
            state.error = None;
            state.last_updated = Some(now);
            rebuild_view(state);
            state.aggregation_result = result;
        });
    }

    /// Operação falhou: mantém o último resultado válido e só marca o erro
    pub fn record_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.transition(|state| {
            state.loading = false;
            state.error = Some(message);
        });
    }

    /// Mescla filtros no estado atual e marca a visão como suja
    pub fn set_filters(&mut self, filters: Vec<Filter>) {
        self.transition(|state| {
            state.filters.merge(filters);
            state.dirty = true;
        });
    }

    pub fn clear_filters(&mut self) {
        self.transition(|state| {
            state.filters.clear();
            state.dirty = true;
        });
    }

    pub fn set_sort(&mut self, field: impl Into<String>, direction: SortDirection) {
        let sort = SortSpec::new(field, direction);
        self.transition(|state| {
            state.sort = Some(sort);
            state.dirty = true;
        });
    }

    pub fn set_window(&mut self, window_days: Option<u32>) {
        self.config.window_days = window_days;
        self.transition(|state| state.dirty = true);
    }

    /// Refaz a visão filtrada+ordenada a partir das entidades brutas
    pub fn apply_filters_and_sort(&mut self) {
        self.transition(rebuild_view);
    }

    /// Roda o motor de agregação sobre a visão atual e sobrescreve o resultado
    pub fn recompute(&mut self) {
        let now = self.clock.now();
        let config = self.config.clone();
        self.transition(|state| {
            if state.dirty {
                rebuild_view(state);
            }
            state.aggregation_result = aggregate(&state.filtered_entities, now, &config);
        });
    }

    pub fn set_page(&mut self, page: usize) {
        self.transition(|state| state.pagination.set_page(page));
    }

    pub fn total_pages(&self) -> usize {
        self.state.pagination.total_pages()
    }

    pub fn page_items(&self) -> &[Entity] {
        let (start, end) = self.state.pagination.range();
        let end = end.min(self.state.filtered_entities.len());
        &self.state.filtered_entities[start.min(end)..end]
    }

    /// Encerra o store: remove listeners e descarta os dados
    pub fn dispose(&mut self) {
        self.listeners.clear();
        let resource = self.state.resource.clone();
        let items_per_page = self.state.pagination.items_per_page;
        self.state = StoreState::new(resource, items_per_page);
    }

    fn transition<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut StoreState),
    {
        let prev = self.state.clone();
        mutate(&mut self.state);
        self.notify(&prev);
    }

    fn notify(&self, prev: &StoreState) {
        for (id, listener) in &self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(&self.state, prev)));
            if result.is_err() {
                log_listener_panicked(&id.to_string());
            }
        }
    }
}

fn rebuild_view(state: &mut StoreState) {
    state.filtered_entities = filter_and_sort(&state.raw_entities, &state.filters, state.sort.as_ref());
    state.pagination.resync(state.filtered_entities.len());
    state.dirty = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageDefinition;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()
    }

    fn store() -> StateStore {
        let config = AggregationConfig {
            window_days: Some(30),
            won_statuses: vec!["converted".to_string()],
            stages: vec![
                StageDefinition::new("new", "Novo"),
                StageDefinition::new("converted", "Convertido"),
            ],
            forecast_lookback: 7,
            growth_multiplier: 1.1,
            forecast_horizon_days: 30,
        };
        StateStore::new("leads", config, 2).with_clock(Clock::Fixed(now()))
    }

    fn leads() -> Vec<Entity> {
        vec![
            Entity::new("1", "new").with_owner("ana").with_created_at(now() - Duration::days(3)),
            Entity::new("2", "converted")
                .with_owner("bruno")
                .with_value(100.0)
                .with_created_at(now() - Duration::days(1)),
            Entity::new("3", "new").with_owner("ana").with_created_at(now() - Duration::days(2)),
            Entity::new("4", "lost").with_owner("carla"),
            Entity::new("5", "new").with_owner("bruno").with_created_at(now() - Duration::days(5)),
        ]
    }

    #[test]
    fn test_load_derives_view_and_aggregation() {
        let mut store = store();
        store.load(leads());

        let state = store.state();
        assert_eq!(state.filtered_entities.len(), 5);
        assert_eq!(state.aggregation_result.kpis.total, 5);
        assert_eq!(state.aggregation_result.kpis.total_revenue, 100.0);
        assert_eq!(state.pagination.total_items, 5);
        assert_eq!(store.total_pages(), 3);
        assert_eq!(state.last_updated, Some(now()));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut store = store();
        store.load(leads());

        store.recompute();
        let first = store.state().aggregation_result.clone();
        store.recompute();
        assert_eq!(store.state().aggregation_result, first);
    }

    #[test]
    fn test_filters_are_anded_and_clearing_restores_everything() {
        let mut store = store();
        store.load(leads());

        store.set_filters(vec![Filter::equals("status", "new"), Filter::equals("owner_id", "ana")]);
        assert!(store.state().dirty);
        store.apply_filters_and_sort();
        assert_eq!(store.state().filtered_entities.len(), 2);
        assert!(!store.state().dirty);

        store.set_filters(vec![Filter::equals("owner_id", "all")]);
        store.apply_filters_and_sort();
        assert_eq!(store.state().filtered_entities.len(), 3);

        store.clear_filters();
        store.apply_filters_and_sort();
        assert_eq!(store.state().filtered_entities.len(), store.state().raw_entities.len());
    }

    #[test]
    fn test_unknown_field_filters_against_empty_string() {
        let mut store = store();
        store.load(leads());

        store.set_filters(vec![Filter::equals("inexistente", "x")]);
        store.apply_filters_and_sort();
        assert!(store.state().filtered_entities.is_empty());
        assert_eq!(store.state().pagination.total_items, 0);
    }

    #[test]
    fn test_sort_created_at_desc_puts_missing_dates_last() {
        let mut store = store();
        store.load(leads());

        store.set_sort("created_at", SortDirection::Desc);
        store.apply_filters_and_sort();
        let ids: Vec<&str> = store.state().filtered_entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1", "5", "4"]);
    }

    #[test]
    fn test_recompute_aggregates_filtered_view() {
        let mut store = store();
        store.load(leads());

        store.set_filters(vec![Filter::equals("owner_id", "ana")]);
        store.recompute();
        assert_eq!(store.state().aggregation_result.kpis.total, 2);
        assert_eq!(store.state().aggregation_result.kpis.total_revenue, 0.0);
    }

    #[test]
    fn test_window_change_marks_dirty_and_applies_on_recompute() {
        let mut store = store();
        store.load(leads());
        assert_eq!(store.state().aggregation_result.kpis.created_in_window, 4);

        store.set_window(Some(1));
        assert!(store.state().dirty);
        assert_eq!(store.config().window_days, Some(1));

        store.recompute();
        assert_eq!(store.state().aggregation_result.kpis.created_in_window, 1);
        assert!(!store.state().dirty);
    }

    #[test]
    fn test_unbounded_window_counts_every_dated_entity() {
        let mut store = store();
        store.load(leads());
        store.set_window(Some(u32::MAX));
        store.recompute();
        assert_eq!(store.state().aggregation_result.kpis.created_in_window, 4);
    }

    #[test]
    fn test_page_resets_when_filter_shrinks_result() {
        let mut store = store();
        store.load(leads());

        store.set_page(3);
        assert_eq!(store.state().pagination.current_page, 3);
        assert_eq!(store.page_items().len(), 1);

        store.set_filters(vec![Filter::equals("status", "new")]);
        store.apply_filters_and_sort();
        assert_eq!(store.state().pagination.current_page, 1);
        assert_eq!(store.page_items().len(), 2);

        store.set_page(99);
        assert_eq!(store.state().pagination.current_page, 2);
    }

    #[test]
    fn test_failure_keeps_last_good_result() {
        let mut store = store();
        store.load(leads());
        let good = store.state().aggregation_result.clone();

        store.set_loading(true);
        store.record_failure("Network error: connection reset");

        let state = store.state();
        assert_eq!(state.aggregation_result, good);
        assert_eq!(state.raw_entities.len(), 5);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Network error: connection reset"));

        store.load(leads());
        assert!(store.state().error.is_none());
    }

    #[test]
    fn test_listeners_receive_new_and_previous_state() {
        let mut store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(move |new, prev| {
            sink.lock()
                .unwrap()
                .push((prev.raw_entities.len(), new.raw_entities.len()));
        });

        store.load(leads());
        store.load(Vec::new());

        assert_eq!(*seen.lock().unwrap(), vec![(0, 5), (5, 0)]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let mut store = store();
        let calls = Arc::new(AtomicUsize::new(0));

        store.subscribe(|_, _| panic!("listener quebrado"));
        let counter = calls.clone();
        let id = store.subscribe(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.load(leads());
        store.set_page(2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set_page(1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispose_drops_listeners_and_data() {
        let mut store = store();
        store.subscribe(|_, _| {});
        store.load(leads());

        store.dispose();
        assert_eq!(store.listener_count(), 0);
        assert!(store.state().raw_entities.is_empty());
        assert_eq!(store.state().aggregation_result, AggregationResult::default());
        assert_eq!(store.state().resource, "leads");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let mut store = store();
        store.load(leads());

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["resource"], "leads");
        assert_eq!(json["kpis"]["totalRevenue"], 100.0);
        assert_eq!(json["pagination"]["itemsPerPage"], 2);
        assert!(json["rankings"].is_array());
    }
}
