//! Filtros, ordenação e paginação sobre coleções de entidades

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{parse_timestamp, value_to_string, Entity};
use crate::utils::normalization::{locale_compare, normalize_string};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[default]
    Equals,
    Contains,
}

/// Predicado `{ field, value }`; todos os filtros ativos são combinados com AND
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub op: FilterOp,
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            op: FilterOp::Equals,
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            op: FilterOp::Contains,
        }
    }

    /// Valor vazio ou "all"/"todos" desativa o filtro do campo
    pub fn is_clearing(&self) -> bool {
        let v = normalize_string(&self.value);
        v.is_empty() || v == "all" || v == "todos"
    }

    /// Campo ausente é comparado como string vazia
    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = entity
            .field(&self.field)
            .map(|v| normalize_string(&value_to_string(&v)))
            .unwrap_or_default();
        let expected = normalize_string(&self.value);

        match self.op {
            FilterOp::Equals => actual == expected,
            FilterOp::Contains => actual.contains(&expected),
        }
    }
}

/// Conjunto de filtros ativos, no máximo um por campo
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterSpec {
    filters: Vec<Filter>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.merge(vec![filter]);
        self
    }

    /// Mescla filtros novos: substitui o do mesmo campo, remove se for "limpar"
    pub fn merge(&mut self, filters: Vec<Filter>) {
        for filter in filters {
            self.filters.retain(|f| f.field != filter.field);
            if !filter.is_clearing() {
                self.filters.push(filter);
            }
        }
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.filters.iter().all(|f| f.matches(entity))
    }

    /// Representação estável usada em chaves de cache
    pub fn cache_fragment(&self) -> String {
        let mut parts: Vec<String> = self
            .filters
            .iter()
            .map(|f| {
                let op = match f.op {
                    FilterOp::Equals => "eq",
                    FilterOp::Contains => "like",
                };
                format!("{}={}.{}", f.field, op, f.value)
            })
            .collect();
        parts.sort();
        parts.join("&")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let ka = SortKey::extract(a.field(&self.field).as_ref(), &self.field);
        let kb = SortKey::extract(b.field(&self.field).as_ref(), &self.field);
        match self.direction {
            SortDirection::Asc => ka.cmp(&kb),
            SortDirection::Desc => kb.cmp(&ka),
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new("created_at", SortDirection::Desc)
    }
}

/// Chave de ordenação com ordem total entre tipos:
/// ausente < data < número < texto
#[derive(Debug, Clone)]
enum SortKey {
    Missing,
    Date(DateTime<Utc>),
    Number(f64),
    Text(String),
}

impl SortKey {
    fn extract(value: Option<&Value>, field: &str) -> Self {
        let value = match value {
            None | Some(Value::Null) => return SortKey::Missing,
            Some(v) => v,
        };

        // heurística de nome: campos *_at são datas
        if field.ends_with("_at") {
            return parse_timestamp(value)
                .map(SortKey::Date)
                .unwrap_or(SortKey::Missing);
        }

        match value {
            Value::Number(n) => n.as_f64().map(SortKey::Number).unwrap_or(SortKey::Missing),
            other => SortKey::Text(value_to_string(other)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Date(_) => 1,
            SortKey::Number(_) => 2,
            SortKey::Text(_) => 3,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => locale_compare(a, b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Filtra (AND) e ordena de forma estável, sem tocar na coleção original
pub fn filter_and_sort(entities: &[Entity], filters: &FilterSpec, sort: Option<&SortSpec>) -> Vec<Entity> {
    let mut view: Vec<Entity> = entities
        .iter()
        .filter(|e| filters.matches(e))
        .cloned()
        .collect();

    if let Some(sort) = sort {
        // sort_by é estável: empates preservam a ordem original
        view.sort_by(|a, b| sort.compare(a, b));
    }

    view
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: usize,
    pub items_per_page: usize,
    pub total_items: usize,
}

impl Pagination {
    pub fn new(items_per_page: usize) -> Self {
        Self {
            current_page: 1,
            items_per_page: items_per_page.max(1),
            total_items: 0,
        }
    }

    pub fn total_pages(&self) -> usize {
        if self.total_items == 0 {
            1
        } else {
            self.total_items.div_ceil(self.items_per_page)
        }
    }

    /// Atualiza o total; volta à página 1 se a atual deixou de existir
    pub fn resync(&mut self, total_items: usize) {
        self.total_items = total_items;
        if self.current_page > self.total_pages() || self.current_page == 0 {
            self.current_page = 1;
        }
    }

    /// Muda de página, limitada ao intervalo válido
    pub fn set_page(&mut self, page: usize) {
        self.current_page = page.clamp(1, self.total_pages());
    }

    /// Intervalo [início, fim) da página atual dentro da visão filtrada
    pub fn range(&self) -> (usize, usize) {
        let start = self.current_page.saturating_sub(1) * self.items_per_page;
        let end = (start + self.items_per_page).min(self.total_items);
        (start.min(end), end)
    }
}
