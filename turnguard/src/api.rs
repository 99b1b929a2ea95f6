// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Caller identity from request headers (authentication happens upstream)
// - Non-streaming and SSE chat endpoints over the TurnOrchestrator
// - Error mapping with fixed public messages
// - Heartbeat endpoint
// - 404 for unknown paths

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::turn::{Caller, TurnError, TurnEvent, TurnOrchestrator, TurnOutcome, TurnRequest};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

const UNKNOWN_IP: &str = "unknown";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing caller identity")]
    Unauthenticated,

    #[error("request body is not a valid chat request: {0}")]
    MalformedBody(String),

    #[error(transparent)]
    Turn(#[from] TurnError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let turn = match self {
            ApiError::Unauthenticated => {
                return error_body(StatusCode::UNAUTHORIZED, "missing caller identity", None, None)
            }
            ApiError::MalformedBody(_) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    "request body is not a valid chat request",
                    None,
                    None,
                )
            }
            ApiError::Turn(turn) => turn,
        };

        let status = match &turn {
            TurnError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            TurnError::InvalidRequest(_)
            | TurnError::UnsafeInput(_)
            | TurnError::UnknownSpecialist(_) => StatusCode::BAD_REQUEST,
            TurnError::ConversationNotFound => StatusCode::NOT_FOUND,
            TurnError::GenerationFailure(_) => StatusCode::BAD_GATEWAY,
            TurnError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let safety = match &turn {
            TurnError::UnsafeInput(verdict) => serde_json::to_value(verdict).ok(),
            _ => None,
        };

        let mut response = error_body(
            status,
            &turn.public_message(),
            turn.reference_code(),
            safety,
        );
        if matches!(turn, TurnError::RateLimited(_)) {
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));
        }
        response
    }
}

fn error_body(
    status: StatusCode,
    message: &str,
    reference_code: Option<&str>,
    safety: Option<serde_json::Value>,
) -> Response {
    let mut body = serde_json::json!({ "error": message });
    if let Some(code) = reference_code {
        body["reference_code"] = serde_json::Value::from(code);
    }
    if let Some(verdict) = safety {
        body["safety"] = verdict;
    }
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// Caller from request headers: `x-user-id` is required, the client IP is
/// the first `x-forwarded-for` entry.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthenticated)?;

    let ip = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_IP);

    Ok(Caller {
        ip: ip.to_string(),
        user_id: user_id.to_string(),
    })
}

fn parse_request(body: &Bytes) -> Result<TurnRequest, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::MalformedBody(e.to_string()))
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TurnOrchestrator,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// POST /v1/chat/send
pub async fn send_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnOutcome>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let request = parse_request(&body)?;
    let outcome = state.orchestrator.run(&caller, request).await?;
    Ok(Json(outcome))
}

/// POST /v1/chat/send-stream
///
/// Header and body problems are plain HTTP errors. Once the turn starts
/// every outcome, rejections included, arrives as an event.
pub async fn send_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = match caller_from_headers(&headers) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let events = state
        .orchestrator
        .run_stream(caller, request)
        .map(|event| Ok::<_, Infallible>(sse_frame(&event)));

    let mut response = Response::new(Body::from_stream(events));
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Frame one event as `data: {json}\n\n`.
pub fn sse_frame(event: &TurnEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(_) => Bytes::from_static(b"data: {\"type\":\"error\",\"error\":\"internal error\"}\n\n"),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unknown path")
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. The orchestrator is injected with all of its
/// collaborators already wired.
pub fn build_router(orchestrator: TurnOrchestrator) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/v1/heartbeat", get(heartbeat))
        .route("/v1/chat/send", post(send_handler))
        .route("/v1/chat/send-stream", post(send_stream_handler))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
