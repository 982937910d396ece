use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::models::known_models;
use crate::provider::client::ProviderClient;
use crate::proxy::{self, CallerContinuity};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::openai_types::{ChatCompletionRequest, ChatError, ChatErrorResponse};
use crate::translate::request::openai_to_anthropic;
use crate::translate::response::{render_anthropic, render_openai, HEADER_CONVERSATION_ID};
use crate::translate::streaming::Dialect;

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const HEADER_PARENT_MESSAGE_ID: &str = "X-Parent-Message-ID";
const DEFAULT_HISTORY_LIMIT: u32 = 20;
const DUMMY_TOKEN: &str = "dummy";

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: ProviderClient,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static("x-conversation-id"),
            HeaderName::from_static("x-assistant-message-id"),
            HeaderName::from_static("x-user-message-id"),
        ]);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/v1/sessions", get(handle_sessions))
        .route("/v1/conversations/:cid/messages", get(handle_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ContinuityQuery {
    cid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContinuityQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credential = match resolve_credential(&headers, &state.config) {
        Ok(c) => c,
        Err(e) => return error_response(Dialect::Anthropic, &e),
    };

    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = ProxyError::validation(format!("Invalid request body: {e}"));
            return error_response(Dialect::Anthropic, &err);
        }
    };

    serve(state, req, Dialect::Anthropic, credential, continuity(query, &headers)).await
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContinuityQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credential = match resolve_credential(&headers, &state.config) {
        Ok(c) => c,
        Err(e) => return error_response(Dialect::OpenAi, &e),
    };

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = ProxyError::validation(format!("Invalid request body: {e}"));
            return error_response(Dialect::OpenAi, &err);
        }
    };

    let bridged = openai_to_anthropic(&req);
    serve(state, bridged, Dialect::OpenAi, credential, continuity(query, &headers)).await
}

async fn serve(
    state: Arc<AppState>,
    req: MessagesRequest,
    dialect: Dialect,
    credential: String,
    continuity: CallerContinuity,
) -> Response {
    let is_streaming = req.stream.unwrap_or(false);

    info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        dialect = ?dialect,
        "Request"
    );

    if is_streaming {
        handle_streaming(state, &req, dialect, &credential, &continuity).await
    } else {
        handle_non_streaming(state, &req, dialect, &credential, &continuity).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    dialect: Dialect,
    credential: &str,
    continuity: &CallerContinuity,
) -> Response {
    let completed = match proxy::proxy_buffered(&state.client, req, credential, continuity).await {
        Ok(c) => c,
        Err(e) => return error_response(dialect, &e),
    };

    let mut response = match dialect {
        Dialect::Anthropic => Json(render_anthropic(&completed.response, &req.model)).into_response(),
        Dialect::OpenAi => Json(render_openai(&completed.response, &req.model)).into_response(),
    };
    apply_headers(&mut response, &completed.headers);
    response
}

async fn handle_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    dialect: Dialect,
    credential: &str,
    continuity: &CallerContinuity,
) -> Response {
    let streaming =
        match proxy::proxy_streaming(&state.client, req, dialect, credential, continuity).await {
            Ok(s) => s,
            Err(e) => return error_response(dialect, &e),
        };

    let event_stream = streaming.frames.map(|frame| -> std::result::Result<Event, Infallible> {
        let event = Event::default().data(frame.data);
        Ok(match frame.event {
            Some(name) => event.event(name),
            None => event,
        })
    });

    let mut response = Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    apply_headers(&mut response, &streaming.headers);
    response
}

async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = resolve_credential(&headers, &state.config) {
        return error_response(Dialect::Anthropic, &e);
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => {
            let serialized = value.to_string();
            Json(serde_json::json!({ "input_tokens": serialized.len() / 4 })).into_response()
        }
        Err(e) => error_response(
            Dialect::Anthropic,
            &ProxyError::validation(format!("Invalid request body: {e}")),
        ),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "messages": "/v1/messages",
            "count_tokens": "/v1/messages/count_tokens",
            "chat_completions": "/v1/chat/completions",
            "models": "/v1/models",
            "sessions": "/v1/sessions",
            "conversation_messages": "/v1/conversations/:cid/messages",
        },
    }))
}

async fn handle_models() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": known_models(), "object": "list" }))
}

async fn handle_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions: Vec<serde_json::Value> = state
        .client
        .sessions()
        .stats()
        .into_iter()
        .map(|(key, s)| {
            serde_json::json!({
                "key": key,
                "cid": s.cid,
                "user_message_id": s.user_message_id,
                "assistant_message_id": s.assistant_message_id,
                "model": s.model,
                "created_at": s.created_at,
                "last_activity": s.last_activity,
                "turn_count": s.turn_count,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": sessions, "count": sessions.len() }))
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Response {
    let credential = match resolve_credential(&headers, &state.config) {
        Ok(c) => c,
        Err(e) => return error_response(Dialect::Anthropic, &e),
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    match state
        .client
        .fetch_conversation_history(&cid, &credential, limit)
        .await
    {
        Ok(history) => Json(history).into_response(),
        Err(e) => error_response(Dialect::Anthropic, &e),
    }
}

/// Bearer token from the request, falling back to the configured environment token.
///
/// # Errors
/// `ProxyError::Authentication` when the header is malformed, no token is
/// available, or the placeholder token is used while disallowed.
pub fn resolve_credential(headers: &HeaderMap, config: &ProxyConfig) -> Result<String> {
    let token = match headers.get(AUTHORIZATION) {
        Some(value) => Some(extract_bearer(value.to_str().unwrap_or_default())?),
        None if config.auth.use_env_token => config.env_token(),
        None => None,
    };

    match token {
        None => Err(ProxyError::authentication("Missing Authorization token")),
        Some(t) if t == DUMMY_TOKEN && !config.auth.allow_dummy => {
            Err(ProxyError::authentication("Dummy token not allowed"))
        }
        Some(t) => Ok(t),
    }
}

fn extract_bearer(header: &str) -> Result<String> {
    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| ProxyError::authentication("invalid Authorization header format"))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ProxyError::authentication("invalid Authorization header format"));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(ProxyError::authentication("empty token in Authorization header"));
    }
    Ok(token.to_string())
}

fn continuity(query: ContinuityQuery, headers: &HeaderMap) -> CallerContinuity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    CallerContinuity {
        conversation_id: query
            .cid
            .filter(|c| !c.trim().is_empty())
            .or_else(|| header(HEADER_CONVERSATION_ID)),
        parent_message_id: header(HEADER_PARENT_MESSAGE_ID),
    }
}

fn apply_headers(response: &mut Response, headers: &[(&'static str, String)]) {
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "Skipping unrepresentable continuity header"),
        }
    }
}

/// Error payload in the caller's dialect with the error's HTTP status.
fn error_response(dialect: Dialect, err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!(status = status.as_u16(), "Request rejected: {}", err);
    }
    match dialect {
        Dialect::Anthropic => (status, Json(ErrorResponse::from(err))).into_response(),
        Dialect::OpenAi => (
            status,
            Json(ChatErrorResponse {
                error: ChatError::from(err),
            }),
        )
            .into_response(),
    }
}
