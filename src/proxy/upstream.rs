//! Outbound call to the chat-completion provider.

use std::time::{Duration, Instant};

use axum::http::header;
use reqwest::Client;

use super::types::UpstreamRequest;
use crate::error::{RelayError, Result};

/// Sends one streaming completion request per call, under a hard deadline.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    endpoint: String,
    deadline: Duration,
}

impl UpstreamClient {
    pub fn new(http: Client, endpoint: impl Into<String>, deadline: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            deadline,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `payload` with bearer auth and wait for the response headers.
    ///
    /// The deadline is a one-shot timer covering connect + headers; once a
    /// success body is handed back it may stream for as long as upstream keeps
    /// sending. A non-success status is read in full within what is left of
    /// the deadline and returned as [`RelayError::UpstreamRejected`].
    pub async fn send(
        &self,
        payload: &UpstreamRequest<'_>,
        credential: &str,
    ) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(credential)
            .json(payload);

        let started = Instant::now();
        let response = match tokio::time::timeout(self.deadline, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(error = %e, endpoint = %self.endpoint, "Failed to reach upstream");
                return Err(RelayError::UpstreamUnreachable(e.to_string()));
            }
            Err(_) => {
                tracing::error!(
                    deadline_ms = self.deadline.as_millis() as u64,
                    endpoint = %self.endpoint,
                    "Upstream deadline exceeded"
                );
                return Err(RelayError::UpstreamUnreachable(format!(
                    "Upstream did not respond within {}ms",
                    self.deadline.as_millis()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
            let remaining = self.deadline.saturating_sub(started.elapsed());
            let body = match tokio::time::timeout(remaining, response.bytes()).await {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => return Err(RelayError::UpstreamUnreachable(e.to_string())),
                Err(_) => {
                    tracing::error!(
                        status = %status,
                        deadline_ms = self.deadline.as_millis() as u64,
                        "Upstream error body not received before deadline"
                    );
                    return Err(RelayError::UpstreamUnreachable(format!(
                        "Upstream returned {} but its body did not arrive within {}ms",
                        status,
                        self.deadline.as_millis()
                    )));
                }
            };
            tracing::warn!(
                status = %status,
                body = %String::from_utf8_lossy(&body),
                "Upstream rejected request"
            );
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        tracing::debug!(status = %status, "Upstream accepted request");
        Ok(response)
    }
}
