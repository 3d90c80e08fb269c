//! HTTP endpoints
//!
//! REST surface of the orchestrator. The turn endpoint wraps every
//! response in the standard envelope `{success, data, message,
//! request_id}`; input sanitation happens here so the engine only ever
//! sees accepted text.

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use dialogue_core::{Error as EngineError, TurnRequest, TurnResult};

use crate::metrics::{metrics_handler, record_rejected, record_request};
use crate::state::AppState;

const MAX_INPUT_CHARS: usize = 1000;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.get_settings();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        // Turn endpoints
        .route("/chat/interact", post(chat_interact))
        .route("/chat/disambiguate", post(chat_disambiguate))
        // Session inspection
        .route("/api/sessions/:id", get(get_session))
        // Health
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Prometheus
        .route("/metrics", get(metrics_handler))
        // Admin
        .route("/admin/reload-config", post(reload_config))
        .route("/admin/reload-domain-config", post(reload_domain_config))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// CORS from configured origins; permissive only when explicitly disabled
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().expect("static origin"))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// Standard response envelope
#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    message: String,
    request_id: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T, request_id: &str) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: "ok".to_string(),
            request_id: request_id.to_string(),
        })
    }

    fn error(message: impl Into<String>, request_id: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            message: message.into(),
            request_id: request_id.to_string(),
        })
    }
}

/// `POST /chat/interact` request body
#[derive(Debug, Deserialize)]
struct ChatRequest {
    user_id: String,
    input: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

/// Strip characters with injection potential, then enforce the length
/// bound. Empty-after-strip is a 400.
fn sanitize_input(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ';' | '<' | '>' | '\'' | '"' | '\\'))
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        return Err("输入内容不能为空".to_string());
    }
    if cleaned.chars().count() > MAX_INPUT_CHARS {
        return Err(format!("输入内容过长，最多{}个字符", MAX_INPUT_CHARS));
    }
    Ok(cleaned)
}

fn new_request_id() -> String {
    format!(
        "req_{}_{}",
        chrono::Utc::now().timestamp(),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

/// `POST /chat/interact`
async fn chat_interact(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    record_request("chat_interact");
    let request_id = new_request_id();

    if request.user_id.trim().is_empty() {
        record_rejected("chat_interact");
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::<TurnResult>::error("user_id不能为空", &request_id),
        );
    }

    let input = match sanitize_input(&request.input) {
        Ok(input) => input,
        Err(message) => {
            record_rejected("chat_interact");
            return (
                StatusCode::BAD_REQUEST,
                ApiResponse::<TurnResult>::error(message, &request_id),
            );
        }
    };

    let turn_request = TurnRequest {
        user_id: request.user_id,
        session_id: request.session_id,
        input,
        context: request.context,
        request_id: request_id.clone(),
    };

    match state.orchestrator.handle_turn(turn_request).await {
        Ok(result) => (StatusCode::OK, ApiResponse::ok(result, &request_id)),
        Err(EngineError::InvalidInput(message)) => (
            StatusCode::BAD_REQUEST,
            ApiResponse::<TurnResult>::error(message, &request_id),
        ),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<TurnResult>::error("服务暂时不可用，请稍后重试", &request_id),
            )
        }
    }
}

/// `POST /chat/disambiguate` request body
#[derive(Debug, Deserialize)]
struct DisambiguateRequest {
    /// The conversation (session) holding the open ambiguity
    conversation_id: String,
    user_choice: String,
}

/// `POST /chat/disambiguate`
async fn chat_disambiguate(
    State(state): State<AppState>,
    Json(request): Json<DisambiguateRequest>,
) -> impl IntoResponse {
    record_request("chat_disambiguate");
    let request_id = new_request_id();

    let choice = match sanitize_input(&request.user_choice) {
        Ok(choice) => choice,
        Err(message) => {
            record_rejected("chat_disambiguate");
            return (
                StatusCode::BAD_REQUEST,
                ApiResponse::<TurnResult>::error(message, &request_id),
            );
        }
    };

    match state
        .orchestrator
        .disambiguate(&request.conversation_id, &choice)
        .await
    {
        Ok(result) => (StatusCode::OK, ApiResponse::ok(result, &request_id)),
        Err(EngineError::Session(message)) => (
            StatusCode::NOT_FOUND,
            ApiResponse::<TurnResult>::error(message, &request_id),
        ),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Disambiguation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<TurnResult>::error("服务暂时不可用，请稍后重试", &request_id),
            )
        }
    }
}

/// `GET /api/sessions/:id`
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, crate::ServerError> {
    let session = state
        .persistence
        .sessions
        .get(&id)
        .await
        .map_err(|e| crate::ServerError::Persistence(e.to_string()))?
        .ok_or_else(|| crate::ServerError::NotFound(format!("session {}", id)))?;

    let turn_count = state
        .persistence
        .conversations
        .latest_turn_id(&id)
        .await
        .map_err(|e| crate::ServerError::Persistence(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "session_id": session.session_id,
        "user_id": session.user_id,
        "state": session.state.as_str(),
        "turn_count": turn_count,
        "created_at": session.created_at.to_rfc3339(),
        "updated_at": session.updated_at.to_rfc3339(),
        "expires_at": session.expires_at.map(|e| e.to_rfc3339()),
    })))
}

/// `GET /health`: liveness plus config sanity
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = state.registry.snapshot();
    let intent_count = snapshot.active_intents().len();

    let healthy = intent_count > 0;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "intents": {
                    "status": if intent_count > 0 { "ok" } else { "empty" },
                    "count": intent_count,
                    "config_version": snapshot.version,
                }
            }
        })),
    )
}

/// `GET /ready`: verifies the classifier endpoint answers
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let endpoint = state.get_settings().nlu.endpoint.clone();

    let nlu_status = if endpoint.is_empty() {
        // Built-in keyword fallback backend; nothing external to probe
        "builtin"
    } else {
        match tokio::time::timeout(
            std::time::Duration::from_secs(2),
            reqwest_head(&endpoint),
        )
        .await
        {
            Ok(true) => "ok",
            Ok(false) => "unreachable",
            Err(_) => "timeout",
        }
    };

    let ready = nlu_status != "unreachable" && nlu_status != "timeout";
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "nlu_backend": { "status": nlu_status, "endpoint": endpoint }
            }
        })),
    )
}

async fn reqwest_head(endpoint: &str) -> bool {
    // A plain TCP-level reachability probe through the HTTP client; any
    // HTTP answer (including 405) counts as reachable
    match reqwest::Client::new().head(endpoint).send().await {
        Ok(_) => true,
        Err(e) => !e.is_connect(),
    }
}

/// `POST /admin/reload-config`
async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_settings() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "success", "message": "Settings reloaded"})),
        ),
        Err(e) => {
            tracing::error!("Settings reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error", "message": e})),
            )
        }
    }
}

/// `POST /admin/reload-domain-config`
async fn reload_domain_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_domain_config() {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "Domain configuration reloaded",
                "version": version,
            })),
        ),
        Err(e) => {
            tracing::error!("Domain config reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "error", "message": e})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_dangerous_chars() {
        let cleaned = sanitize_input("我要订机票; <script>'\"\\").unwrap();
        assert_eq!(cleaned, "我要订机票 script");
    }

    #[test]
    fn test_sanitize_rejects_empty_after_strip() {
        assert!(sanitize_input(";;;'\"").is_err());
        assert!(sanitize_input("   ").is_err());
    }

    #[test]
    fn test_sanitize_rejects_oversized() {
        let long = "好".repeat(MAX_INPUT_CHARS + 1);
        assert!(sanitize_input(&long).is_err());
        let fits = "好".repeat(MAX_INPUT_CHARS);
        assert!(sanitize_input(&fits).is_ok());
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert!(id.starts_with("req_"));
        assert!(id.len() > 10);
    }
}
