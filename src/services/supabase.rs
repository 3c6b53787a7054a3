//! Fonte de dados Supabase (PostgREST)
//!
//! - GET    /rest/v1/{tabela}?select=*&campo=eq.valor
//! - POST   /rest/v1/{tabela}              (Prefer: return=representation)
//! - PATCH  /rest/v1/{tabela}?id=eq.{id}     (Prefer: return=representation)
//! - DELETE /rest/v1/{tabela}?id=eq.{id}     (Prefer: return=representation)
//!
//! PATCH/DELETE que não casam nenhuma linha voltam 200 com `[]`; isso vira
//! erro lógico PGRST116 (registro não encontrado).
//!
//! Status 5xx viram `ApiError::Remote` com o código HTTP (transitório);
//! 4xx viram envelope com o erro do PostgREST (lógico, sem retry).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;

use super::api_client::{RemoteErrorBody, RemoteResponse};
use super::data_source::{DataSource, RemoteResult};
use crate::config::settings::SupabaseSettings;
use crate::config::ResourceSettings;
use crate::models::{FilterOp, FilterSpec};
use crate::utils::{ApiError, AppError, AppResult};

#[derive(Clone)]
pub struct SupabaseDataSource {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
    schema: String,
}

impl SupabaseDataSource {
    /// Cria o cliente; timeout total vem de `timeout_seconds`, connect fixo em 5s
    pub fn new(settings: &SupabaseSettings) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.anon_key.clone(),
            schema: settings.schema.clone(),
        })
    }

    fn table_url(&self, resource: &ResourceSettings) -> String {
        format!("{}/rest/v1/{}", self.base_url, resource.table_name())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept-Profile", &self.schema)
            .header("Content-Profile", &self.schema)
    }

    /// Filtros do dashboard → parâmetros PostgREST
    fn filter_params(filters: &FilterSpec) -> Vec<(String, String)> {
        filters
            .filters()
            .iter()
            .map(|f| {
                let expr = match f.op {
                    FilterOp::Equals => format!("eq.{}", f.value),
                    FilterOp::Contains => format!("ilike.*{}*", f.value),
                };
                (f.field.clone(), expr)
            })
            .collect()
    }

    async fn handle_response(&self, response: Response) -> RemoteResult {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(RemoteResponse::Bare(Value::Null));
            }
            let json: Value = serde_json::from_str(&body)?;
            return Ok(RemoteResponse::from_json(json));
        }

        let error_body = serde_json::from_str::<RemoteErrorBody>(&body).unwrap_or(RemoteErrorBody {
            message: body.clone(),
            code: None,
            details: None,
        });

        tracing::debug!("Supabase respondeu {}: {}", status, error_body.message);

        if status.is_server_error() {
            return Err(ApiError::Remote {
                code: Some(status.as_u16().to_string()),
                message: error_body.message,
            });
        }

        Ok(RemoteResponse::Envelope {
            data: None,
            error: Some(error_body),
        })
    }

    /// Representação vazia numa mutação por id: nenhuma linha casou
    fn require_row(id: &str, response: RemoteResponse) -> RemoteResponse {
        match response {
            RemoteResponse::Bare(Value::Array(rows)) if rows.is_empty() => {
                RemoteResponse::err(format!("registro {} não encontrado", id), Some("PGRST116"))
            }
            other => other,
        }
    }
}

#[async_trait]
impl DataSource for SupabaseDataSource {
    async fn fetch_entities(&self, resource: &ResourceSettings, filters: &FilterSpec) -> RemoteResult {
        let url = self.table_url(resource);
        tracing::debug!("GET {}", url);

        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(Self::filter_params(filters));

        let response = self
            .authorized(self.http_client.get(&url))
            .query(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn create_entity(&self, resource: &ResourceSettings, payload: &Value) -> RemoteResult {
        let url = self.table_url(resource);
        tracing::debug!("POST {}", url);

        let response = self
            .authorized(self.http_client.post(&url))
            .header("Prefer", "return=representation")
            .json(payload)
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn update_entity(&self, resource: &ResourceSettings, id: &str, patch: &Value) -> RemoteResult {
        let url = self.table_url(resource);
        tracing::debug!("PATCH {} id={}", url, id);

        let response = self
            .authorized(self.http_client.patch(&url))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .json(patch)
            .send()
            .await?;

        let response = self.handle_response(response).await?;
        Ok(Self::require_row(id, response))
    }

    async fn delete_entity(&self, resource: &ResourceSettings, id: &str) -> RemoteResult {
        let url = self.table_url(resource);
        tracing::debug!("DELETE {} id={}", url, id);

        let response = self
            .authorized(self.http_client.delete(&url))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;

        let response = self.handle_response(response).await?;
        Ok(Self::require_row(id, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Filter;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    fn source(server: &MockServer) -> SupabaseDataSource {
        let settings = SupabaseSettings {
            url: server.base_url(),
            anon_key: "anon-key".to_string(),
            schema: "public".to_string(),
            timeout_seconds: 5,
        };
        SupabaseDataSource::new(&settings).unwrap()
    }

    fn leads() -> ResourceSettings {
        let mut settings = ResourceSettings::new("leads");
        settings.table = Some("leads_crm".to_string());
        settings
    }

    #[tokio::test]
    async fn test_fetch_sends_filters_and_auth_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/leads_crm")
                    .query_param("select", "*")
                    .query_param("status", "eq.new")
                    .query_param("name", "ilike.*ana*")
                    .header("apikey", "anon-key")
                    .header("Authorization", "Bearer anon-key");
                then.status(200).json_body(json!([{"id": 1, "status": "new"}]));
            })
            .await;

        let filters = FilterSpec::new()
            .with(Filter::equals("status", "new"))
            .with(Filter::contains("name", "ana"));
        let response = source(&server).fetch_entities(&leads(), &filters).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            response.into_result().unwrap(),
            json!([{"id": 1, "status": "new"}])
        );
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/v1/leads_crm");
                then.status(503).json_body(json!({"message": "upstream unavailable"}));
            })
            .await;

        let err = source(&server)
            .fetch_entities(&leads(), &FilterSpec::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(
            err,
            ApiError::Remote {
                code: Some("503".into()),
                message: "upstream unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn test_client_error_becomes_logical_envelope_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rest/v1/leads_crm");
                then.status(401)
                    .json_body(json!({"message": "JWT expired", "code": "PGRST301"}));
            })
            .await;

        let response = source(&server)
            .create_entity(&leads(), &json!({"name": "Ana"}))
            .await
            .unwrap();

        let err = response.into_result().unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Remote error (PGRST301): JWT expired");
    }

    #[tokio::test]
    async fn test_delete_targets_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/rest/v1/leads_crm")
                    .query_param("id", "eq.42");
                then.status(204);
            })
            .await;

        let response = tokio_test::assert_ok!(source(&server).delete_entity(&leads(), "42").await);
        mock.assert_async().await;
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_mutation_on_missing_id_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/leads_crm")
                    .query_param("id", "eq.404");
                then.status(200).json_body(json!([]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/rest/v1/leads_crm")
                    .header("Prefer", "return=representation")
                    .query_param("id", "eq.404");
                then.status(200).json_body(json!([]));
            })
            .await;

        let source = source(&server);
        let patched = source
            .update_entity(&leads(), "404", &json!({"status": "won"}))
            .await
            .unwrap();
        let deleted = source.delete_entity(&leads(), "404").await.unwrap();

        for response in [patched, deleted] {
            let err = tokio_test::assert_err!(response.into_result());
            assert!(!err.is_transient());
            assert!(matches!(err, ApiError::Remote { code: Some(ref c), .. } if c == "PGRST116"));
        }
    }

    #[tokio::test]
    async fn test_update_returns_updated_rows() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/leads_crm")
                    .query_param("id", "eq.7");
                then.status(200).json_body(json!([{"id": 7, "status": "won"}]));
            })
            .await;

        let response = source(&server)
            .update_entity(&leads(), "7", &json!({"status": "won"}))
            .await
            .unwrap();
        assert_eq!(response.into_result().unwrap(), json!([{"id": 7, "status": "won"}]));
    }
}
