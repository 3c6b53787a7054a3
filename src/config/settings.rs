use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub supabase: SupabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceSettings>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupabaseSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// TTL das listas de entidades
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// TTL dos KPIs derivados
    #[serde(default = "default_kpi_ttl_ms")]
    pub kpi_ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyticsSettings {
    /// Janela em dias (None = todo o histórico)
    #[serde(default = "default_window_days")]
    pub window_days: Option<u32>,
    #[serde(default = "default_forecast_horizon_days")]
    pub forecast_horizon_days: u32,
    #[serde(default = "default_growth_multiplier")]
    pub growth_multiplier: f64,
    /// Quantos buckets de tendência entram na média móvel
    #[serde(default = "default_forecast_lookback")]
    pub forecast_lookback: usize,
    /// Status terminais considerados "ganho/convertido"
    #[serde(default = "default_won_statuses")]
    pub won_statuses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaginationSettings {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RealtimeSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Mapeamento de um recurso (tabela) para os campos que o núcleo entende
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResourceSettings {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
    #[serde(default = "default_owner_field")]
    pub owner_field: String,
    #[serde(default = "default_created_field")]
    pub created_field: String,
}

impl ResourceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            status_field: default_status_field(),
            value_field: default_value_field(),
            owner_field: default_owner_field(),
            created_field: default_created_field(),
        }
    }

    /// Nome da tabela no backend (cai no nome do recurso)
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

fn default_schema() -> String {
    "public".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_namespace() -> String {
    "alsham".to_string()
}
fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_kpi_ttl_ms() -> u64 {
    60 * 1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_concurrency() -> usize {
    5
}
fn default_window_days() -> Option<u32> {
    Some(30)
}
fn default_forecast_horizon_days() -> u32 {
    30
}
fn default_growth_multiplier() -> f64 {
    1.1
}
fn default_forecast_lookback() -> usize {
    7
}
fn default_won_statuses() -> Vec<String> {
    ["converted", "convertido", "won", "ganho", "closed_won", "fechado"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_items_per_page() -> usize {
    20
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_status_field() -> String {
    "status".to_string()
}
fn default_value_field() -> String {
    "value".to_string()
}
fn default_owner_field() -> String {
    "owner_id".to_string()
}
fn default_created_field() -> String {
    "created_at".to_string()
}
fn default_resources() -> Vec<ResourceSettings> {
    let mut leads = ResourceSettings::new("leads");
    leads.table = Some("leads_crm".to_string());
    leads.value_field = "estimated_value".to_string();
    leads.owner_field = "assigned_to".to_string();

    let mut deals = ResourceSettings::new("deals");
    deals.table = Some("sales_opportunities".to_string());
    deals.status_field = "stage".to_string();

    let mut activities = ResourceSettings::new("activities");
    activities.table = Some("user_activities".to_string());
    activities.value_field = "points".to_string();
    activities.owner_field = "user_id".to_string();

    vec![leads, deals, activities]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase: SupabaseSettings::default(),
            cache: CacheSettings::default(),
            client: ClientSettings::default(),
            analytics: AnalyticsSettings::default(),
            pagination: PaginationSettings::default(),
            realtime: RealtimeSettings::default(),
            resources: default_resources(),
        }
    }
}

impl Default for SupabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            schema: default_schema(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_ttl_ms: default_ttl_ms(),
            kpi_ttl_ms: default_kpi_ttl_ms(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            forecast_horizon_days: default_forecast_horizon_days(),
            growth_multiplier: default_growth_multiplier(),
            forecast_lookback: default_forecast_lookback(),
            won_statuses: default_won_statuses(),
        }
    }
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            // Arquivo de configuração base
            .add_source(File::with_name("config/default").required(false))
            // Arquivo específico do ambiente
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false));

        // Variáveis usadas pelo frontend original
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            builder = builder.set_override("supabase.url", url)?;
        }
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
            builder = builder.set_override("supabase.anon_key", key)?;
        }

        builder = builder.add_source(Environment::with_prefix("ALSHAM").separator("__"));

        let s = builder.build()?;

        s.try_deserialize()
    }

    /// Valida o que o binário precisa para falar com o backend
    pub fn validate(&self) -> Result<(), String> {
        if self.supabase.url.trim().is_empty() {
            return Err("supabase.url não configurado (SUPABASE_URL)".to_string());
        }
        if self.supabase.anon_key.trim().is_empty() {
            return Err("supabase.anon_key não configurado (SUPABASE_ANON_KEY)".to_string());
        }
        if self.client.max_concurrency == 0 {
            return Err("client.max_concurrency deve ser maior que zero".to_string());
        }
        if self.pagination.items_per_page == 0 {
            return Err("pagination.items_per_page deve ser maior que zero".to_string());
        }
        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSettings> {
        self.resources.iter().find(|r| r.name == name)
    }
}
