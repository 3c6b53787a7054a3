//! Motor de agregação: KPIs, ranking, tendências, funil e previsão
//!
//! Funções puras sobre um snapshot de entidades + "agora" de referência.
//! Nenhum estado escondido: a mesma entrada produz sempre o mesmo resultado.
//! Entrada vazia ou malformada nunca gera erro, só zeros.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::config::{AnalyticsSettings, StageDefinition};
use crate::models::entity::parse_number;
use crate::models::{
    AggregationResult, Entity, Forecast, FunnelStage, Kpis, RankingEntry, TrendGranularity,
    TrendPoint,
};

/// Acima disso a tendência passa a ser semanal
const DAILY_TREND_MAX_DAYS: i64 = 30;

/// Mínimo de buckets para projetar
const MIN_FORECAST_BUCKETS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    pub window_days: Option<u32>,
    pub won_statuses: Vec<String>,
    pub stages: Vec<StageDefinition>,
    pub forecast_lookback: usize,
    pub growth_multiplier: f64,
    pub forecast_horizon_days: u32,
}

impl AggregationConfig {
    pub fn from_settings(settings: &AnalyticsSettings, stages: Vec<StageDefinition>) -> Self {
        Self {
            window_days: settings.window_days,
            won_statuses: settings.won_statuses.clone(),
            stages,
            forecast_lookback: settings.forecast_lookback.max(1),
            growth_multiplier: settings.growth_multiplier,
            forecast_horizon_days: settings.forecast_horizon_days,
        }
    }
}

/// Recalcula tudo a partir do snapshot
pub fn aggregate(entities: &[Entity], now: DateTime<Utc>, config: &AggregationConfig) -> AggregationResult {
    let kpis = compute_kpis(entities, now, config.window_days, &config.won_statuses);
    let rankings = compute_rankings(entities, &config.won_statuses);
    let granularity = trend_granularity(entities, config.window_days);
    let trends = compute_trends(entities, now, config.window_days, granularity, &config.won_statuses);
    let funnel = compute_funnel(entities, &config.stages);
    let forecast = compute_forecast(
        &trends,
        granularity,
        config.forecast_lookback,
        config.growth_multiplier,
        config.forecast_horizon_days,
    );

    AggregationResult {
        kpis,
        rankings,
        granularity,
        trends,
        funnel,
        forecast,
    }
}

fn window_start(now: DateTime<Utc>, window_days: Option<u32>) -> Option<DateTime<Utc>> {
    window_days.map(|days| days_before(now, days))
}

/// Recuo em dias; além do menor instante representável a janela fica sem limite inferior
fn days_before(t: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    t.checked_sub_signed(Duration::days(days as i64))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn in_window(entity: &Entity, start: Option<DateTime<Utc>>) -> bool {
    match (start, entity.created_at) {
        (None, _) => true,
        (Some(start), Some(created)) => created >= start,
        // sem data não entra em janela
        (Some(_), None) => false,
    }
}

pub fn compute_kpis(
    entities: &[Entity],
    now: DateTime<Utc>,
    window_days: Option<u32>,
    won_statuses: &[String],
) -> Kpis {
    let total = entities.len();
    if total == 0 {
        return Kpis::default();
    }

    let start = window_start(now, window_days);
    let created_in_window = entities.iter().filter(|e| in_window(e, start)).count();

    let mut status_distribution = BTreeMap::new();
    for entity in entities {
        let key = if entity.status.is_empty() {
            "unknown".to_string()
        } else {
            entity.status.clone()
        };
        *status_distribution.entry(key).or_insert(0) += 1;
    }

    let won: Vec<&Entity> = entities.iter().filter(|e| e.is_won(won_statuses)).collect();
    let converted = won.len();
    let total_revenue: f64 = won.iter().map(|e| e.numeric_value()).sum();
    let value_sum: f64 = entities.iter().map(|e| e.numeric_value()).sum();

    Kpis {
        total,
        created_in_window,
        status_distribution,
        converted,
        conversion_rate: percentage(converted, total),
        average_value: round2(value_sum / total as f64),
        total_revenue,
        growth_rate: growth_rate(entities, now, window_days, created_in_window),
    }
}

/// Janela atual contra a janela imediatamente anterior de mesmo tamanho
fn growth_rate(entities: &[Entity], now: DateTime<Utc>, window_days: Option<u32>, current: usize) -> f64 {
    let Some(days) = window_days else {
        return 0.0;
    };
    let current_start = days_before(now, days);
    let previous_start = days_before(current_start, days);

    let previous = entities
        .iter()
        .filter_map(|e| e.created_at)
        .filter(|created| *created >= previous_start && *created < current_start)
        .count();

    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }

    round1((current as f64 - previous as f64) / previous as f64 * 100.0)
}

/// Agrupa por responsável, ordena por receita desc (estável) e numera a partir de 1.
/// Só entidades ganhas somam receita.
pub fn compute_rankings(entities: &[Entity], won_statuses: &[String]) -> Vec<RankingEntry> {
    rank_by(entities, won_statuses, |entity, won| {
        if won {
            entity.numeric_value()
        } else {
            0.0
        }
    })
}

/// Ranking de gamificação: soma `points_field` de todas as atividades
pub fn compute_leaderboard(activities: &[Entity], points_field: &str) -> Vec<RankingEntry> {
    rank_by(activities, &[], |activity, _| {
        activity
            .field(points_field)
            .and_then(|v| parse_number(&v))
            .unwrap_or(0.0)
    })
}

fn rank_by<F>(entities: &[Entity], won_statuses: &[String], score: F) -> Vec<RankingEntry>
where
    F: Fn(&Entity, bool) -> f64,
{
    // ordem de primeira aparição, para empates estáveis
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, RankingEntry> = HashMap::new();

    for entity in entities {
        let owner = entity
            .owner
            .clone()
            .unwrap_or_else(|| "unassigned".to_string());

        let group = groups.entry(owner.clone()).or_insert_with(|| {
            order.push(owner.clone());
            RankingEntry {
                rank: 0,
                owner,
                revenue: 0.0,
                count: 0,
                converted: 0,
                conversion_rate: 0.0,
            }
        });

        let won = entity.is_won(won_statuses);
        group.count += 1;
        if won {
            group.converted += 1;
        }
        group.revenue += score(entity, won);
    }

    let mut rankings: Vec<RankingEntry> = order
        .into_iter()
        .filter_map(|owner| groups.remove(&owner))
        .map(|mut entry| {
            entry.conversion_rate = percentage(entry.converted, entry.count);
            entry
        })
        .collect();

    rankings.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
    for (index, entry) in rankings.iter_mut().enumerate() {
        entry.rank = index + 1;
    }
    rankings
}

/// Diário até 30 dias de janela; semanal acima. Sem janela, decide pelo
/// intervalo coberto pelas datas.
pub fn trend_granularity(entities: &[Entity], window_days: Option<u32>) -> TrendGranularity {
    let span_days = match window_days {
        Some(days) => days as i64,
        None => {
            let dates = entities.iter().filter_map(|e| e.created_at);
            match (dates.clone().min(), dates.max()) {
                (Some(min), Some(max)) => (max - min).num_days(),
                _ => 0,
            }
        }
    };

    if span_days > DAILY_TREND_MAX_DAYS {
        TrendGranularity::Week
    } else {
        TrendGranularity::Day
    }
}

pub fn bucket_key(created_at: DateTime<Utc>, granularity: TrendGranularity) -> NaiveDate {
    let date = created_at.date_naive();
    match granularity {
        TrendGranularity::Day => date,
        TrendGranularity::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
    }
}

/// Série temporal em ordem cronológica; entidades sem data ficam de fora
pub fn compute_trends(
    entities: &[Entity],
    now: DateTime<Utc>,
    window_days: Option<u32>,
    granularity: TrendGranularity,
    won_statuses: &[String],
) -> Vec<TrendPoint> {
    let start = window_start(now, window_days);
    let mut buckets: BTreeMap<NaiveDate, TrendPoint> = BTreeMap::new();

    for entity in entities {
        let Some(created_at) = entity.created_at else {
            continue;
        };
        if !in_window(entity, start) {
            continue;
        }

        let bucket = bucket_key(created_at, granularity);
        let point = buckets.entry(bucket).or_insert(TrendPoint {
            bucket,
            revenue: 0.0,
            count: 0,
        });
        point.count += 1;
        if entity.is_won(won_statuses) {
            point.revenue += entity.numeric_value();
        }
    }

    buckets.into_values().collect()
}

/// Contagem cumulativa: quem está no estágio i alcançou todos os anteriores
pub fn compute_funnel(entities: &[Entity], stages: &[StageDefinition]) -> Vec<FunnelStage> {
    if stages.is_empty() {
        return Vec::new();
    }

    let mut reached_exactly = vec![0usize; stages.len()];
    for entity in entities {
        if let Some(index) = stages.iter().position(|s| s.matches(&entity.status)) {
            reached_exactly[index] += 1;
        }
    }

    // soma do fim para o começo
    let mut counts = vec![0usize; stages.len()];
    let mut running = 0;
    for index in (0..stages.len()).rev() {
        running += reached_exactly[index];
        counts[index] = running;
    }

    let first = counts[0];
    stages
        .iter()
        .zip(counts)
        .map(|(stage, count)| FunnelStage {
            key: stage.key.clone(),
            label: stage.label.clone(),
            count,
            percentage: percentage(count, first),
        })
        .collect()
}

/// Média móvel dos últimos `lookback` buckets × multiplicador × horizonte
pub fn compute_forecast(
    trends: &[TrendPoint],
    granularity: TrendGranularity,
    lookback: usize,
    growth_multiplier: f64,
    horizon_days: u32,
) -> Forecast {
    if trends.len() < MIN_FORECAST_BUCKETS {
        return Forecast {
            projected_revenue: 0.0,
            basis_buckets: trends.len(),
            horizon_days,
            insufficient_data: true,
        };
    }

    let lookback = lookback.max(1).min(trends.len());
    let recent = &trends[trends.len() - lookback..];
    let average = recent.iter().map(|p| p.revenue).sum::<f64>() / lookback as f64;

    // horizonte em unidades de bucket
    let scale = match granularity {
        TrendGranularity::Day => horizon_days as f64,
        TrendGranularity::Week => horizon_days as f64 / 7.0,
    };

    Forecast {
        projected_revenue: round2(average * growth_multiplier * scale),
        basis_buckets: lookback,
        horizon_days,
        insufficient_data: false,
    }
}

/// part / whole * 100 com uma casa; 0 quando whole é 0
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
