// Pipeline completo sobre fonte em memória: busca → agregação → store

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::json;

use alsham_analytics::config::{Settings, StageCatalogue};
use alsham_analytics::models::{Filter, SortDirection};
use alsham_analytics::services::{
    Clock, DashboardPipeline, EntityRepository, InMemoryDataSource, RetryingClient, TtlCache,
};
use alsham_analytics::utils::ApiError;

fn build(source: Arc<InMemoryDataSource>) -> DashboardPipeline {
    let mut settings = Settings::default();
    settings.client.backoff_base_ms = 5;
    settings.pagination.items_per_page = 2;

    let catalogue = StageCatalogue::embedded().unwrap();
    let client = RetryingClient::new(TtlCache::new("it"), settings.client.max_concurrency);
    let repository = EntityRepository::new(source, client, settings.client.clone(), settings.cache.clone());
    let now = Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap();

    DashboardPipeline::with_clock(repository, &settings, &catalogue, Clock::Fixed(now))
}

fn seeded() -> Arc<InMemoryDataSource> {
    let source = Arc::new(InMemoryDataSource::new());
    source.seed(
        "leads",
        vec![
            json!({"id": 1, "status": "Novo", "assigned_to": "ana", "created_at": "2026-06-20T09:00:00Z"}),
            json!({"id": 2, "status": "contatado", "assigned_to": "ana", "created_at": "2026-06-22T09:00:00Z"}),
            json!({"id": 3, "status": "qualificado", "assigned_to": "bruno", "created_at": "2026-06-25 14:30:00"}),
            json!({"id": 4, "status": "convertido", "estimated_value": "2500.50", "assigned_to": "bruno", "created_at": "2026-06-28"}),
            json!({"id": 5, "status": "convertido", "estimated_value": 1000, "assigned_to": "carla", "created_at": "2026-06-29T18:00:00Z"}),
        ],
    );
    source.seed("deals", vec![]);
    source.seed("activities", vec![]);
    source
}

#[tokio::test]
async fn refresh_aggregates_leads_end_to_end() {
    let pipeline = build(seeded());
    let summary = pipeline.refresh().await;
    assert!(summary.failed.is_empty());

    let leads = pipeline.state("leads").await.unwrap();
    let result = &leads.aggregation_result;

    assert_eq!(result.kpis.total, 5);
    assert_eq!(result.kpis.converted, 2);
    assert_eq!(result.kpis.conversion_rate, 40.0);
    assert_eq!(result.kpis.total_revenue, 3500.5);

    let owners: Vec<&str> = result.rankings.iter().map(|r| r.owner.as_str()).collect();
    assert_eq!(owners, vec!["bruno", "carla", "ana"]);

    let funnel: Vec<usize> = result.funnel.iter().map(|s| s.count).collect();
    assert_eq!(funnel, vec![5, 4, 3, 2, 2]);

    assert_eq!(result.trends.len(), 5);
    assert!(result.trends.windows(2).all(|w| w[0].bucket < w[1].bucket));
    assert!(!result.forecast.insufficient_data);

    let deals = pipeline.state("deals").await.unwrap();
    assert_eq!(deals.aggregation_result.kpis.total, 0);
    assert!(deals.aggregation_result.rankings.is_empty());
}

#[tokio::test]
async fn filters_sort_and_pagination_through_the_store() {
    let pipeline = build(seeded());
    pipeline.refresh().await;

    let ids = pipeline
        .with_store("leads", |store| {
            store.set_filters(vec![Filter::equals("status", "convertido")]);
            store.set_sort("created_at", SortDirection::Desc);
            store.recompute();
            store.state().filtered_entities.iter().map(|e| e.id.clone()).collect::<Vec<_>>()
        })
        .await
        .unwrap();
    assert_eq!(ids, vec!["5", "4"]);

    let (total, pages) = pipeline
        .with_store("leads", |store| {
            store.clear_filters();
            store.apply_filters_and_sort();
            store.set_page(3);
            (store.state().filtered_entities.len(), store.page_items().len())
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(pages, 1);
}

#[tokio::test]
async fn subscribers_see_failed_refresh_with_stale_data() {
    let source = seeded();
    let pipeline = build(source.clone());
    pipeline.refresh().await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    pipeline
        .with_store("leads", move |store| {
            store.subscribe(move |new, _prev| {
                if let Some(e) = &new.error {
                    sink.lock().unwrap().push((e.clone(), new.aggregation_result.kpis.total));
                }
            })
        })
        .await
        .unwrap();

    pipeline.repository().invalidate(&Settings::default().resources[0]).await;
    source.fail_next("leads", vec![ApiError::remote("invalid input syntax")]);
    let summary = pipeline.refresh().await;

    assert_eq!(summary.failed, vec!["leads"]);
    let seen = errors.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, 5);
}

#[tokio::test]
async fn stage_catalogue_loads_for_the_snapshot_binary() {
    // sem STAGES_CONFIG_PATH cai no catálogo embutido
    if std::env::var("STAGES_CONFIG_PATH").is_ok() {
        return;
    }
    let catalogue = StageCatalogue::load().await.unwrap();
    assert_eq!(catalogue.stages_for("leads").len(), 5);
    assert_eq!(catalogue.stages_for("deals").len(), 5);
    assert!(catalogue.stages_for("activities").is_empty());
}
