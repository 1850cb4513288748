//! Remote execution of queued actions over the annotation REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ActionType, SyncAction};
use crate::util::{compact_text, normalize_http_url};

/// HTTP status the server uses to reject a stale mutation
pub const CONFLICT_STATUS: u16 = 409;

/// Structured outcome of one delivery attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResult {
    pub success: bool,
    pub status_code: Option<u16>,
    /// Server-authoritative entity snapshot, when the response carried one
    pub server_entity: Option<Value>,
    pub error: Option<String>,
}

impl ApiResult {
    #[must_use]
    pub const fn delivered(status_code: Option<u16>, server_entity: Option<Value>) -> Self {
        Self {
            success: true,
            status_code,
            server_entity,
            error: None,
        }
    }

    #[must_use]
    pub const fn conflict(server_entity: Option<Value>) -> Self {
        Self {
            success: false,
            status_code: Some(CONFLICT_STATUS),
            server_entity,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code,
            server_entity: None,
            error: Some(error.into()),
        }
    }

    /// Classify the result for the queue's decision logic
    #[must_use]
    pub fn into_outcome(self) -> ApiOutcome {
        if self.success {
            return ApiOutcome::Delivered(self.server_entity);
        }
        if self.status_code == Some(CONFLICT_STATUS) {
            return ApiOutcome::Conflict(self.server_entity);
        }
        let message = self.error.unwrap_or_else(|| {
            self.status_code.map_or_else(
                || "delivery failed".to_string(),
                |status| format!("HTTP {status}"),
            )
        });
        ApiOutcome::Failed(message)
    }
}

/// Decision-relevant view of an [`ApiResult`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    Delivered(Option<Value>),
    Conflict(Option<Value>),
    Failed(String),
}

/// Executes one queued action against the remote service.
///
/// Implementations never return errors: every failure is expressed in the
/// returned [`ApiResult`].
#[async_trait]
pub trait ApiAdapter: Send + Sync {
    async fn execute_action(&self, action: &SyncAction, auth_token: &str) -> ApiResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request resolved for one action
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

/// Resolve the REST call for an action: one route per entity type and action type.
#[must_use]
pub fn resolve_route(action: &SyncAction) -> ApiRequest {
    let collection = action.entity_type.collection();
    let body = || {
        Some(
            action
                .payload
                .clone()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        )
    };

    match action.action_type {
        ActionType::Create => ApiRequest {
            method: HttpMethod::Post,
            path: format!("/{collection}"),
            body: body(),
        },
        ActionType::Update => ApiRequest {
            method: HttpMethod::Patch,
            path: format!("/{collection}/{}", action.entity_id),
            body: body(),
        },
        ActionType::Delete => ApiRequest {
            method: HttpMethod::Delete,
            path: format!("/{collection}/{}", action.entity_id),
            body: None,
        },
    }
}

/// [`ApiAdapter`] over HTTP with bearer authentication
#[derive(Clone)]
pub struct HttpApiAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApiAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for HttpApiAdapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpApiAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ApiAdapter for HttpApiAdapter {
    async fn execute_action(&self, action: &SyncAction, auth_token: &str) -> ApiResult {
        let request = resolve_route(action);
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &url)
            .bearer_auth(auth_token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => {
                return ApiResult::failed(None, format!("request failed: {error}"));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return ApiResult::delivered(Some(status.as_u16()), parse_entity(&body));
        }
        if status == StatusCode::CONFLICT {
            return ApiResult::conflict(parse_entity(&body));
        }
        ApiResult::failed(Some(status.as_u16()), parse_api_error(status, &body))
    }
}

/// [`ApiAdapter`] for hosts without a configured server.
///
/// Every delivery fails transiently, so actions stay queued until a real
/// adapter is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedApi;

#[async_trait]
impl ApiAdapter for DisconnectedApi {
    async fn execute_action(&self, _action: &SyncAction, _auth_token: &str) -> ApiResult {
        ApiResult::failed(None, "API base URL is not configured")
    }
}

/// Extract an entity snapshot from a response body.
///
/// Accepts a bare object with an `id`, the first object of an array, or an
/// object wrapped in `data`.
fn parse_entity(body: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let candidate = match value {
        Value::Array(items) => items.into_iter().next()?,
        Value::Object(mut object) if !object.contains_key("id") => object.remove("data")?,
        other => other,
    };
    candidate.get("id").is_some().then_some(candidate)
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(Error::Config("API base URL must not be empty".to_string()));
    }
    normalize_http_url(&raw).ok_or_else(|| {
        Error::Config("API base URL must include http:// or https://".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn action(action_type: ActionType, payload: Option<Value>) -> SyncAction {
        SyncAction::new(EntityType::Annotation, "a1", action_type, payload, 1)
    }

    /// Serve exactly one canned HTTP response and return the base URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0_u8; 8192];
            let _ = socket.read(&mut buffer).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[test]
    fn resolve_route_maps_each_action_type() {
        let payload = json!({ "id": "a1", "content": "hi" });

        let create = resolve_route(&action(ActionType::Create, Some(payload.clone())));
        assert_eq!(create.method, HttpMethod::Post);
        assert_eq!(create.path, "/annotations");
        assert_eq!(create.body, Some(payload.clone()));

        let update = resolve_route(&action(ActionType::Update, Some(payload.clone())));
        assert_eq!(update.method, HttpMethod::Patch);
        assert_eq!(update.path, "/annotations/a1");
        assert_eq!(update.body, Some(payload));

        let delete = resolve_route(&action(ActionType::Delete, None));
        assert_eq!(delete.method, HttpMethod::Delete);
        assert_eq!(delete.path, "/annotations/a1");
        assert_eq!(delete.body, None);
    }

    #[test]
    fn into_outcome_classifies_results() {
        let entity = json!({ "id": "a1" });
        assert_eq!(
            ApiResult::delivered(Some(200), Some(entity.clone())).into_outcome(),
            ApiOutcome::Delivered(Some(entity.clone()))
        );
        assert_eq!(
            ApiResult::conflict(Some(entity.clone())).into_outcome(),
            ApiOutcome::Conflict(Some(entity))
        );
        assert_eq!(
            ApiResult::failed(Some(503), "unavailable (503)").into_outcome(),
            ApiOutcome::Failed("unavailable (503)".to_string())
        );
        let bare = ApiResult {
            status_code: Some(500),
            ..ApiResult::default()
        };
        assert_eq!(bare.into_outcome(), ApiOutcome::Failed("HTTP 500".to_string()));
    }

    #[test]
    fn parse_entity_accepts_common_shapes() {
        assert_eq!(
            parse_entity(r#"{"id":"a1","updatedAt":5}"#),
            Some(json!({ "id": "a1", "updatedAt": 5 }))
        );
        assert_eq!(
            parse_entity(r#"[{"id":"a1"}]"#),
            Some(json!({ "id": "a1" }))
        );
        assert_eq!(
            parse_entity(r#"{"data":{"id":"a1"}}"#),
            Some(json!({ "id": "a1" }))
        );
        assert_eq!(parse_entity(""), None);
        assert_eq!(parse_entity(r#"{"ok":true}"#), None);
    }

    #[test]
    fn parse_api_error_prefers_message_fields() {
        assert_eq!(
            parse_api_error(StatusCode::UNAUTHORIZED, r#"{"error":"jwt expired"}"#),
            "jwt expired (401)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  "),
            "HTTP 502"
        );
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)"
        );
    }

    #[test]
    fn new_rejects_invalid_base_urls() {
        assert!(HttpApiAdapter::new("  ", Duration::from_secs(1)).is_err());
        assert!(HttpApiAdapter::new("api.example.com", Duration::from_secs(1)).is_err());
        let adapter = HttpApiAdapter::new("https://api.example.com/v1/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(adapter.base_url(), "https://api.example.com/v1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disconnected_api_always_fails() {
        let result = DisconnectedApi
            .execute_action(&action(ActionType::Create, None), "token")
            .await;
        assert_eq!(
            result.into_outcome(),
            ApiOutcome::Failed("API base URL is not configured".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_response_carries_server_entity() {
        let base = serve_once("200 OK", r#"{"id":"a1","updatedAt":7}"#).await;
        let adapter = HttpApiAdapter::new(base, Duration::from_secs(5)).unwrap();

        let result = adapter
            .execute_action(&action(ActionType::Update, Some(json!({"content":"x"}))), "token")
            .await;

        assert!(result.success);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.server_entity, Some(json!({ "id": "a1", "updatedAt": 7 })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_response_maps_to_409_with_entity() {
        let base = serve_once("409 Conflict", r#"{"id":"a1","content":"server wins"}"#).await;
        let adapter = HttpApiAdapter::new(base, Duration::from_secs(5)).unwrap();

        let result = adapter
            .execute_action(&action(ActionType::Update, Some(json!({}))), "token")
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, Some(409));
        assert_eq!(
            result.server_entity,
            Some(json!({ "id": "a1", "content": "server wins" }))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_maps_to_failure_message() {
        let base = serve_once("503 Service Unavailable", r#"{"message":"maintenance"}"#).await;
        let adapter = HttpApiAdapter::new(base, Duration::from_secs(5)).unwrap();

        let result = adapter
            .execute_action(&action(ActionType::Delete, None), "token")
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, Some(503));
        assert_eq!(result.error.as_deref(), Some("maintenance (503)"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_is_a_transient_failure() {
        let adapter =
            HttpApiAdapter::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();

        let result = adapter
            .execute_action(&action(ActionType::Create, Some(json!({}))), "token")
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert!(result.error.unwrap().starts_with("request failed"));
    }
}
