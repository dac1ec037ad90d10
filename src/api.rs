//! REST API Server for the Financial Dialogue Orchestrator
//!
//! Exposes the session service via HTTP endpoints
//! Integrates with the chat frontend

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::{NodeId, TurnOutcome};
use crate::models::MessagePayload;
use crate::session::SessionService;
use crate::state::ConversationState;

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub reply: Option<String>,
    pub payload_kind: &'static str,
    pub payload: MessagePayload,
    pub error: Option<String>,
    pub path: Vec<NodeId>,
}

impl ChatResponse {
    fn from_outcome(session_id: Uuid, outcome: TurnOutcome) -> Self {
        let (reply, payload) = match outcome.reply {
            Some(message) => (Some(message.content), message.payload),
            None => (None, MessagePayload::None),
        };
        Self {
            session_id,
            reply,
            payload_kind: payload.kind(),
            payload,
            error: outcome.error,
            path: outcome.path,
        }
    }
}

/// Durable context of a session, without the transcript bodies
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub ticker: Option<String>,
    pub tickers: Vec<String>,
    pub company_name: Option<String>,
    pub has_fetched_data: bool,
    pub has_processed_data: bool,
    pub message_count: usize,
    pub last_input: String,
}

impl SessionSummary {
    fn new(session_id: Uuid, state: &ConversationState) -> Self {
        Self {
            session_id,
            ticker: state.ticker.clone(),
            tickers: state.tickers.clone(),
            company_name: state.company_name.clone(),
            has_fetched_data: state.has_fetched(),
            has_processed_data: state.has_processed(),
            message_count: state.messages.len(),
            last_input: state.input.clone(),
        }
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn internal_error(context: &str, e: impl std::fmt::Display) -> ApiResult {
    error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(format!("{}: {}", context, e))),
    )
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionService>,
}

/// =============================
/// Helpers
/// =============================

pub fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Client session ids are free-form; anything that is not a UUID is hashed
pub fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v.trim()).unwrap_or_else(|_| stable_uuid_from_string(v.trim()))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    // No id means a fresh conversation
    let session_id = match req.session_id.as_deref() {
        Some(_) => parse_or_stable_uuid(req.session_id.as_deref(), "anonymous-session"),
        None => Uuid::new_v4(),
    };
    info!(%session_id, "Received chat turn");

    match state.sessions.handle_turn(session_id, &req.message).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(ChatResponse::from_outcome(
                session_id, outcome,
            ))),
        ),
        Err(e) => internal_error("Turn failed", e),
    }
}

/// =============================
/// Session Endpoints
/// =============================

async fn get_session(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let session_id = parse_or_stable_uuid(Some(&session_id), "anonymous-session");

    match state.sessions.state(session_id).await {
        Ok(Some(conversation)) => (
            StatusCode::OK,
            Json(ApiResponse::success(SessionSummary::new(
                session_id,
                &conversation,
            ))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Session {} not found", session_id))),
        ),
        Err(e) => internal_error("Failed to load session", e),
    }
}

async fn reset_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let session_id = parse_or_stable_uuid(Some(&session_id), "anonymous-session");

    match state.sessions.reset_session(session_id).await {
        Ok(existed) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "reset": existed,
            }))),
        ),
        Err(e) => internal_error("Failed to reset session", e),
    }
}

async fn get_traces(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    let session_id = parse_or_stable_uuid(Some(&session_id), "anonymous-session");

    let traces = match state.sessions.traces(session_id).await {
        Ok(traces) => traces,
        Err(e) => return internal_error("Failed to load traces", e),
    };

    match state.sessions.verify_session(session_id).await {
        Ok(checkpoint_intact) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "checkpoint_intact": checkpoint_intact,
                "traces": traces,
            }))),
        ),
        Err(e) => internal_error("Failed to verify session", e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(sessions: Arc<SessionService>) -> Router {
    let state = ApiState { sessions };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat_handler))
        .route(
            "/api/v1/sessions/:session_id",
            get(get_session).delete(reset_session),
        )
        .route("/api/v1/sessions/:session_id/traces", get(get_traces))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    sessions: Arc<SessionService>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(sessions);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Orchestrator;
    use crate::llm::ScriptedInference;
    use crate::models::{Message, ToolRequest};
    use crate::state::InMemoryCheckpointStore;
    use crate::tools::{create_default_registry, SampleFinanceBackend};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(script: Vec<Message>) -> Router {
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedInference::new(script).with_fallback("Hello!")),
            Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new()))),
            8,
        );
        create_router(Arc::new(SessionService::new(
            Arc::new(orchestrator),
            Box::new(InMemoryCheckpointStore::new()),
        )))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn chat(session_id: &str, message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"session_id": session_id, "message": message}).to_string(),
            ))
            .unwrap()
    }

    #[test]
    fn test_stable_uuid_is_deterministic() {
        let a = stable_uuid_from_string("chat-42");
        assert_eq!(a, stable_uuid_from_string("chat-42"));
        assert_ne!(a, stable_uuid_from_string("chat-43"));
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_parse_or_stable_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(Some(&id.to_string()), "x"), id);
        assert_eq!(
            parse_or_stable_uuid(Some("my-chat"), "x"),
            stable_uuid_from_string("my-chat")
        );
        assert_eq!(parse_or_stable_uuid(Some("  "), "x"), stable_uuid_from_string("x"));
        assert_eq!(parse_or_stable_uuid(None, "x"), stable_uuid_from_string("x"));
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiResponse::success(json!({"answer": 42}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ApiResponse::error("nope".into());
        assert!(!failed.success);
        assert!(failed.data.is_none());
    }

    #[tokio::test]
    async fn test_chat_turn_and_session_endpoints() {
        let router = router(vec![
            Message::tool_calls(
                "",
                vec![ToolRequest::new("lookup_ticker", json!({"company_name": "Apple"}))],
            ),
            Message::assistant("Found `AAPL`."),
        ]);
        let session_id = stable_uuid_from_string("demo-chat");

        let (status, body) = send(&router, chat("demo-chat", "Apple?")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["reply"], "Found `AAPL`.");
        assert_eq!(body["data"]["session_id"], session_id.to_string());
        assert_eq!(body["data"]["path"][0], "decision");

        let get = Request::builder()
            .uri(format!("/api/v1/sessions/{}", session_id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, get).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ticker"], "AAPL");

        let traces = Request::builder()
            .uri("/api/v1/sessions/demo-chat/traces")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(&router, traces).await;
        assert_eq!(body["data"]["traces"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["traces"][0]["turn_index"], 1);
        assert_eq!(body["data"]["checkpoint_intact"], true);

        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/v1/sessions/demo-chat")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(&router, delete).await;
        assert_eq!(body["data"]["reset"], true);

        let get = Request::builder()
            .uri("/api/v1/sessions/demo-chat")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, get).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_empty_message_is_a_bad_request() {
        let router = router(vec![]);
        let (status, body) = send(&router, chat("s", "  ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
