//! Error types for promptrelay.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Per-request failure taxonomy.
///
/// Every variant is local to one request; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Incorrect password, please contact the site administrator.")]
    AuthFailed,

    #[error("No input text was provided.")]
    EmptyInput,

    #[error("No API key was provided, or the API key is malformed.")]
    NoCredential,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Network failure or deadline exceeded before the upstream answered.
    #[error("{0}")]
    UpstreamUnreachable(String),

    /// Upstream answered with a non-success status. Surfaced verbatim.
    #[error("Upstream returned {status}")]
    UpstreamRejected {
        status: u16,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    /// An event payload mid-stream was not valid JSON.
    #[error("Malformed upstream payload: {0}")]
    MalformedUpstreamPayload(String),
}

impl RelayError {
    /// HTTP status used when this error is answered before streaming starts.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::AuthFailed
            | RelayError::EmptyInput
            | RelayError::NoCredential
            | RelayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::MalformedUpstreamPayload(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            RelayError::UpstreamRejected {
                content_type, body, ..
            } => {
                let mut response = (status, body).into_response();
                match content_type {
                    Some(value) => {
                        response.headers_mut().insert(header::CONTENT_TYPE, value);
                    }
                    None => {
                        response.headers_mut().remove(header::CONTENT_TYPE);
                    }
                }
                response
            }
            other => {
                let body = serde_json::json!({
                    "error": {
                        "message": other.to_string()
                    }
                });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(response: Response) -> (StatusCode, Bytes) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn validation_errors_use_400_envelope() {
        for err in [
            RelayError::AuthFailed,
            RelayError::EmptyInput,
            RelayError::NoCredential,
            RelayError::InvalidBody("expected value".to_string()),
        ] {
            let message = err.to_string();
            let (status, body) = read(err.into_response()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"]["message"], message);
        }
    }

    #[tokio::test]
    async fn unreachable_uses_500_with_cause_text() {
        let err = RelayError::UpstreamUnreachable("connection refused".to_string());
        let (status, body) = read(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["message"], "connection refused");
    }

    #[tokio::test]
    async fn rejection_passes_status_and_body_through() {
        let err = RelayError::UpstreamRejected {
            status: 401,
            content_type: Some(HeaderValue::from_static("application/json")),
            body: Bytes::from_static(br#"{"error":"bad key"}"#),
        };
        let response = err.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let (status, body) = read(response).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(&body[..], br#"{"error":"bad key"}"#);
    }
}
