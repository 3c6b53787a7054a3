//! Entidades do CRM (lead, oportunidade, atividade, usuário)
//!
//! As linhas chegam do backend como JSON livre. O núcleo extrai os campos
//! que entende (id, criação, status, valor, responsável) com defaults
//! defensivos e guarda a linha inteira para filtros e ordenação.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ResourceSettings;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Status normalizado em lowercase (vazio se ausente)
    pub status: String,
    pub value: Option<f64>,
    pub owner: Option<String>,
    /// Linha original
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        let id = id.into();
        let status = status.into().trim().to_lowercase();
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.clone()));
        fields.insert("status".to_string(), Value::String(status.clone()));
        Self {
            id,
            created_at: None,
            status,
            value: None,
            owner: None,
            fields,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.fields.insert(
            "created_at".to_string(),
            Value::String(created_at.to_rfc3339()),
        );
        self.created_at = Some(created_at);
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.fields.insert("value".to_string(), serde_json::json!(value));
        self.value = Some(value);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        self.fields
            .insert("owner_id".to_string(), Value::String(owner.clone()));
        self.owner = Some(owner);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Constrói a entidade a partir de uma linha JSON do backend
    pub fn from_row(row: &Map<String, Value>, resource: &ResourceSettings) -> Self {
        let id = row.get("id").map(value_to_string).unwrap_or_default();

        let status = row
            .get(&resource.status_field)
            .map(value_to_string)
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let value = row.get(&resource.value_field).and_then(parse_number);

        let owner = row
            .get(&resource.owner_field)
            .map(value_to_string)
            .filter(|s| !s.trim().is_empty());

        let created_at = row.get(&resource.created_field).and_then(parse_timestamp);

        Self {
            id,
            created_at,
            status,
            value,
            owner,
            fields: row.clone(),
        }
    }

    /// Valor numérico com default 0 (ausente ou não finito)
    pub fn numeric_value(&self) -> f64 {
        match self.value {
            Some(v) if v.is_finite() => v,
            _ => 0.0,
        }
    }

    /// Busca um campo da linha; cai nos atributos extraídos quando a linha
    /// não tem a chave.
    pub fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.fields.get(name) {
            return Some(value.clone());
        }
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "status" => Some(Value::String(self.status.clone())),
            "value" => self.value.map(|v| serde_json::json!(v)),
            "owner" => self.owner.clone().map(Value::String),
            "created_at" => self.created_at.map(|t| Value::String(t.to_rfc3339())),
            _ => None,
        }
    }

    pub fn is_won(&self, won_statuses: &[String]) -> bool {
        won_statuses.iter().any(|s| s.eq_ignore_ascii_case(&self.status))
    }
}

/// Converte o `data` de uma resposta (array ou objeto único) em entidades.
/// Linhas que não são objetos são descartadas.
pub fn entities_from_value(data: &Value, resource: &ResourceSettings) -> Vec<Entity> {
    match data {
        Value::Array(rows) => rows
            .iter()
            .filter_map(|row| row.as_object())
            .map(|row| Entity::from_row(row, resource))
            .collect(),
        Value::Object(row) => vec![Entity::from_row(row, resource)],
        _ => Vec::new(),
    }
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Número ou string numérica ("1.500,00" não é aceito; o backend manda ponto)
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Aceita RFC 3339, datetime sem fuso (assumido UTC) ou data pura
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::String(s) => s.trim(),
        Value::Number(n) => {
            // epoch em milissegundos
            return n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        }
        _ => return None,
    };

    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    // formato do Postgres: "2026-01-05 10:11:12.123+00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
