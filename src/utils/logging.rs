use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Inicializa o subscriber de tracing respeitando `RUST_LOG`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("alsham_analytics=info"));

    // try_init: ignora se já houver subscriber global (testes, binários embutidos)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn log_config_loaded(env: &str) {
    info!("Configuration loaded successfully for environment: {}", env);
}

pub fn log_cache_hit(key: &str) {
    debug!("🎯 Cache hit: {}", key);
}

pub fn log_cache_miss(key: &str) {
    debug!("🔍 Cache miss: {}", key);
}

pub fn log_cache_invalidated(pattern: &str, removed: usize) {
    debug!("🧹 Cache invalidado: '{}' ({} entradas removidas)", pattern, removed);
}

pub fn log_retry_scheduled(call: &str, attempt: u32, max_retries: u32, backoff_ms: u64, error: &str) {
    warn!(
        "⚠️ {}: tentativa {}/{} falhou ({}). Retry em {}ms...",
        call, attempt, max_retries, error, backoff_ms
    );
}

pub fn log_call_failed(call: &str, retries: u32, error: &str) {
    error!("❌ {}: falhou após {} retries - {}", call, retries, error);
}

pub fn log_refresh_started(resources: usize) {
    info!("🔄 Atualizando dashboard: {} recursos", resources);
}

pub fn log_refresh_finished(resource: &str, entities: usize, duration_ms: u64) {
    info!(
        "✅ Recurso '{}' atualizado: {} entidades em {}ms",
        resource, entities, duration_ms
    );
}

pub fn log_fetch_failed(resource: &str, error: &str) {
    warn!(
        "⚠️ Falha ao buscar '{}' - mantendo último resultado válido: {}",
        resource, error
    );
}

pub fn log_listener_panicked(subscription: &str) {
    error!("❌ Listener '{}' entrou em pânico - ignorado", subscription);
}

pub fn log_info(message: &str) {
    info!("{}", message);
}

pub fn log_warning(message: &str) {
    warn!("{}", message);
}
