//! HTTP surface
//!
//! - `POST /api/chat/stream`: one conversation turn as `text/event-stream`
//! - `GET /health`: liveness document
//!
//! Problems found before streaming starts are answered with a JSON error and
//! a matching status code. After that the stream itself carries any error.

pub mod identity;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{ChatError, Result};
use crate::llm::types::ChatRequest;
use crate::service::ChatService;

pub use identity::{bearer_token, client_ip};
pub use rate_limit::{IpRateLimiter, RateLimited};

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state for request handlers
pub struct AppState {
    pub service: ChatService,
    pub rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(service: ChatService) -> Self {
        let rate_limiter = IpRateLimiter::from_config(&service.config().server.rate_limit);
        Self { service, rate_limiter }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Chat server listening");

    let pruner = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            pruner.rate_limiter.prune_stale();
        }
    });

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

fn rate_limited_response(limited: RateLimited) -> Response {
    let secs = limited.retry_after_secs();
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({"error": "Too many requests", "retryAfter": secs})),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn status_for(error: &ChatError) -> StatusCode {
    match error {
        ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Parse the body, rejecting anything without a messages array.
fn parse_request(body: &[u8]) -> std::result::Result<ChatRequest, String> {
    let value: Value = serde_json::from_slice(body).map_err(|_| "Invalid JSON body".to_string())?;
    if !value.get("messages").is_some_and(Value::is_array) {
        return Err("Messages array is required".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("Invalid request: {}", e))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip = client_ip(&headers, peer);
    if let Err(limited) = state.rate_limiter.check_and_record(&ip) {
        return rate_limited_response(limited);
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(message) => {
            warn!(client = %ip, error = %message, "Rejected chat request");
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };

    let caller = state
        .service
        .config()
        .access
        .caller_for_token(bearer_token(&headers));
    info!(
        client = %ip,
        level = %caller.access_level,
        model = %request.model,
        messages = request.messages.len(),
        tools = request.enable_tools,
        "Chat request"
    );

    let stream = match state.service.start_turn(request, caller).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(client = %ip, error = %e, "Chat turn not started");
            return error_response(status_for(&e), e.client_message());
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream.into_sse()),
    )
        .into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.service.config();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "maxIterations": config.conversation.max_iterations,
    }))
}
