//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;

use super::server::{AppState, RequestId};
use super::stream::relay_fragments;
use super::types::{ChatRequest, UpstreamRequest};
use crate::config::AuthConfig;
use crate::credentials;
use crate::error::{RelayError, Result};

/// Handle POST /api/ai
///
/// Validation failures are answered with a JSON error envelope. On success
/// the body is the raw completion text, streamed as it arrives. If the
/// client goes away the body stream is dropped, which drops the upstream
/// response and closes that connection too.
pub async fn relay(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response> {
    let start = std::time::Instant::now();

    let result = execute_request(&state, &body).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => tracing::info!(
            request_id = %request_id.0,
            latency_ms,
            "Relay response started"
        ),
        Err(e) => tracing::warn!(
            request_id = %request_id.0,
            latency_ms,
            status = e.status().as_u16(),
            error = %e,
            "Relay request failed"
        ),
    }

    result
}

/// Validate, intercept or forward one request.
async fn execute_request(state: &AppState, body: &[u8]) -> Result<Response> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|e| RelayError::InvalidBody(e.to_string()))?;

    authorize(&state.config.auth, request.password.as_deref())?;

    let last_message = request.last_message().ok_or(RelayError::EmptyInput)?;

    tracing::info!(
        model = ?request.model,
        messages = request.messages.len(),
        "Received relay request"
    );

    if let Some(canned) = state.interceptor.find(&last_message.content) {
        tracing::info!("Answered from interception table");
        return Ok(text_response(Body::from(canned.to_string())));
    }

    let credential = select_credential(state, request.key.as_deref())?;

    let upstream_response = state
        .upstream
        .send(&UpstreamRequest::from(&request), &credential)
        .await?;

    let body = Body::from_stream(relay_fragments(upstream_response.bytes_stream()));
    Ok(text_response(body))
}

/// Check the request password against the configured one, if any.
fn authorize(auth: &AuthConfig, presented: Option<&str>) -> Result<()> {
    match auth.required_password() {
        Some(required) if presented != Some(required) => Err(RelayError::AuthFailed),
        _ => Ok(()),
    }
}

/// Pick a key from the request's own credential string, or from the
/// configured default pool when the request carries none.
fn select_credential(state: &AppState, requested: Option<&str>) -> Result<String> {
    match requested {
        Some(raw) => credentials::select(raw),
        None => state
            .default_pool
            .as_ref()
            .map(|pool| pool.choose().to_string())
            .ok_or(RelayError::NoCredential),
    }
}

fn text_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "promptrelay"
    }))
}
