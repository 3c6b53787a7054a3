use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Indicadores principais de uma coleção
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total: usize,
    pub created_in_window: usize,
    pub status_distribution: BTreeMap<String, usize>,
    pub converted: usize,
    /// converted / total * 100, uma casa decimal
    pub conversion_rate: f64,
    pub average_value: f64,
    /// Soma do valor das entidades em estado ganho/convertido
    pub total_revenue: f64,
    /// Variação (%) da janela atual contra a janela anterior
    pub growth_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    /// 1-based
    pub rank: usize,
    pub owner: String,
    pub revenue: f64,
    pub count: usize,
    pub converted: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendGranularity {
    #[default]
    Day,
    Week,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// Dia, ou segunda-feira da semana ISO
    pub bucket: NaiveDate,
    pub revenue: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStage {
    pub key: String,
    pub label: String,
    pub count: usize,
    /// Relativo ao primeiro estágio
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub projected_revenue: f64,
    pub basis_buckets: usize,
    pub horizon_days: u32,
    pub insufficient_data: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub kpis: Kpis,
    pub rankings: Vec<RankingEntry>,
    pub granularity: TrendGranularity,
    pub trends: Vec<TrendPoint>,
    pub funnel: Vec<FunnelStage>,
    pub forecast: Forecast,
}
