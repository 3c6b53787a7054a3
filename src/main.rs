/// ALSHAM 360° - snapshot analítico do dashboard
///
/// Fluxo:
/// - Carrega configuração (arquivos + ambiente) e o catálogo de estágios
/// - Busca todos os recursos configurados no Supabase em paralelo
/// - Agrega KPIs, rankings, tendências, funil e previsão por recurso
/// - Imprime o snapshot em JSON no stdout

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use alsham_analytics::config::{Settings, StageCatalogue};
use alsham_analytics::services::{DashboardPipeline, SupabaseDataSource};
use alsham_analytics::utils::logging::{init_tracing, log_config_loaded, log_info, log_warning};

const LEADERBOARD_RESOURCE: &str = "activities";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenvy::dotenv().is_ok();

    init_tracing();

    if env_loaded {
        tracing::info!("✅ Arquivo .env carregado com sucesso");
    } else {
        tracing::debug!("Arquivo .env não encontrado - usando variáveis de ambiente do sistema");
    }

    let settings = Settings::new().context("Failed to load settings")?;
    if let Err(e) = settings.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    log_config_loaded(&std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string()));

    let catalogue = StageCatalogue::load()
        .await
        .context("Failed to load stage catalogue")?;
    let source = SupabaseDataSource::new(&settings.supabase)?;

    let pipeline = DashboardPipeline::from_settings(Arc::new(source), &settings, &catalogue);

    let summary = pipeline.refresh().await;
    log_info(&format!(
        "📊 Dashboard atualizado: {} ok, {} com falha",
        summary.refreshed.len(),
        summary.failed.len()
    ));
    for resource in &summary.failed {
        log_warning(&format!("⚠️ Recurso '{}' sem dados atualizados", resource));
    }

    let leaderboard = match pipeline.leaderboard(LEADERBOARD_RESOURCE).await {
        Ok(entries) => json!(entries),
        Err(_) => json!([]),
    };

    let resources = pipeline.snapshots().await;
    let cache_stats = pipeline.repository().client().cache().stats().await;

    let output = json!({
        "generatedAt": chrono::Utc::now(),
        "resources": resources,
        "leaderboard": leaderboard,
        "cache": cache_stats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    pipeline.dispose().await;
    Ok(())
}
