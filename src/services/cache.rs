//! Cache TTL genérico chave → valor
//!
//! Substitui os vários `Map` independentes que cada tela mantinha. Um único
//! componente, parametrizado por namespace, com expiração absoluta por
//! entrada, invalidação por chave/substring e contadores de hit/miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::FilterSpec;
use crate::utils::logging::{log_cache_hit, log_cache_invalidated, log_cache_miss};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    namespace: String,
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Outro namespace sobre o mesmo armazenamento, com estatísticas próprias
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::clone(&self.entries),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Chave lógica se a chave armazenada pertence a este namespace
    fn logical_key<'a>(&self, stored: &'a str) -> Option<&'a str> {
        stored
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }

    /// Grava com expiração absoluta `agora + ttl`, sobrescrevendo a entrada anterior
    pub async fn set(&self, key: impl AsRef<str>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let key = self.storage_key(key.as_ref());
        self.entries.write().await.insert(key, entry);
    }

    /// Retorna o valor se presente e válido; entrada vencida é removida
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let key = self.storage_key(key);
        let mut entries = self.entries.write().await;
        let mut stats = self.stats.write().await;

        match entries.get(&key) {
            Some(entry) if now <= entry.expires_at => {
                stats.hits += 1;
                log_cache_hit(&key);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(&key);
                stats.misses += 1;
                stats.evictions += 1;
                log_cache_miss(&key);
                None
            }
            None => {
                stats.misses += 1;
                log_cache_miss(&key);
                None
            }
        }
    }

    /// Remove, dentro do namespace, a chave exata e todas as chaves que
    /// contêm `pattern`. Retorna quantas entradas saíram.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|stored, _| match self.logical_key(stored) {
            Some(key) => key != pattern && !key.contains(pattern),
            None => true,
        });
        let removed = before - entries.len();
        log_cache_invalidated(&self.storage_key(pattern), removed);
        removed
    }

    pub async fn clear(&self) {
        self.entries
            .write()
            .await
            .retain(|stored, _| self.logical_key(stored).is_none());
    }

    /// Varre e remove as entradas vencidas do namespace
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|stored, entry| self.logical_key(stored).is_none() || now <= entry.expires_at);
        let removed = before - entries.len();

        if removed > 0 {
            self.stats.write().await.evictions += removed as u64;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = *self.stats.read().await;
        stats.entries = self
            .entries
            .read()
            .await
            .keys()
            .filter(|stored| self.logical_key(stored).is_some())
            .count();
        stats
    }
}

/// Prefixo comum a todas as chaves de listagem de um recurso
pub fn resource_prefix(resource: &str) -> String {
    format!("resource:{}?", resource)
}

/// Chave de uma listagem de recurso com filtros
pub fn resource_key(resource: &str, filters: &FilterSpec) -> String {
    format!("{}{}", resource_prefix(resource), filters.cache_fragment())
}

/// Prefixo comum a todos os KPIs derivados de um recurso
pub fn kpi_key(resource: &str) -> String {
    format!("kpi:{}?", resource)
}

/// Chave do resultado agregado de uma visão (filtros + janela) de um recurso
pub fn kpi_view_key(resource: &str, filters: &FilterSpec, window_days: Option<u32>) -> String {
    let window = window_days.map(|d| d.to_string()).unwrap_or_else(|| "all".to_string());
    format!("{}{}&window={}", kpi_key(resource), filters.cache_fragment(), window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Filter;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = TtlCache::new("test");
        cache.set("k", 7, Duration::from_millis(100)).await;

        assert_eq!(cache.get("k").await, Some(7));

        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_renews_expiry() {
        let cache = TtlCache::new("test");
        cache.set("k", "a".to_string(), Duration::from_millis(50)).await;
        tokio::time::advance(Duration::from_millis(40)).await;
        cache.set("k", "b".to_string(), Duration::from_millis(50)).await;
        tokio::time::advance(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_invalidate_exact_and_substring() {
        let cache = TtlCache::new("test");
        let ttl = Duration::from_secs(60);
        let filtered = FilterSpec::new().with(Filter::equals("status", "new"));

        cache.set(resource_key("leads", &FilterSpec::new()), 1, ttl).await;
        cache.set(resource_key("leads", &filtered), 2, ttl).await;
        cache.set(resource_key("leads_archive", &FilterSpec::new()), 3, ttl).await;
        cache.set(kpi_view_key("leads", &FilterSpec::new(), Some(30)), 4, ttl).await;

        assert_eq!(cache.invalidate(&resource_prefix("leads")).await, 2);
        assert_eq!(cache.invalidate(&kpi_key("leads")).await, 1);
        assert_eq!(cache.invalidate("inexistente").await, 0);

        assert_eq!(cache.get(&resource_key("leads_archive", &FilterSpec::new())).await, Some(3));
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_clear() {
        let cache = TtlCache::new("test");
        cache.set("curto", 1, Duration::from_millis(10)).await;
        cache.set("longo", 2, Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.entries, 1);

        cache.clear().await;
        assert_eq!(cache.get("longo").await, None);
    }

    #[tokio::test]
    async fn test_namespaces_keep_same_key_apart() {
        let ttl = Duration::from_secs(60);
        let leads = TtlCache::new("a");
        let deals = leads.with_namespace("b");

        leads.set("k", 1, ttl).await;
        deals.set("k", 2, ttl).await;

        assert_eq!(leads.get("k").await, Some(1));
        assert_eq!(deals.get("k").await, Some(2));
        {
            let stored = leads.entries.read().await;
            assert_eq!(stored.len(), 2);
            assert!(stored.contains_key("a:k"));
            assert!(stored.contains_key("b:k"));
        }

        assert_eq!(leads.invalidate("k").await, 1);
        assert_eq!(leads.get("k").await, None);
        assert_eq!(deals.get("k").await, Some(2));
        assert_eq!(deals.stats().await.entries, 1);

        leads.set("outra", 3, ttl).await;
        deals.clear().await;
        assert_eq!(leads.get("outra").await, Some(3));
        assert_eq!(leads.stats().await.entries, 1);
    }

    #[test]
    fn test_kpi_view_key_shares_resource_prefix() {
        let filtered = FilterSpec::new().with(Filter::equals("status", "new"));
        let key = kpi_view_key("leads", &filtered, Some(30));
        assert!(key.starts_with(&kpi_key("leads")));
        assert!(!key.starts_with(&kpi_key("leads_archive")));
        assert_ne!(key, kpi_view_key("leads", &filtered, None));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            evictions: 0,
            entries: 0,
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
