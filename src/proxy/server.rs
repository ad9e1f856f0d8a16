//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::handlers;
use super::upstream::UpstreamClient;
use crate::config::Config;
use crate::credentials::CredentialPool;
use crate::intercept::Interceptor;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-promptrelay-request-id";

/// Per-request correlation ID, inserted as a request extension.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state. Everything in here is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub interceptor: Arc<Interceptor>,
    /// Pool parsed from `upstream.api_key`; `None` when no usable default exists.
    pub default_pool: Option<Arc<CredentialPool>>,
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Build state from a loaded configuration.
    ///
    /// Loads the interceptor rule table (reading `rules_file` if set) and
    /// parses the default credential pool once.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let interceptor = Interceptor::from_config(&config.interceptor)?;

        let default_pool = config.upstream.api_key.as_ref().and_then(|raw| {
            let pool = CredentialPool::parse(raw.expose_secret()).ok();
            if pool.is_none() {
                tracing::warn!("upstream.api_key contains no usable keys");
            }
            pool.map(Arc::new)
        });

        // No client-wide timeout: it would also cut off long-running streams.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let upstream = UpstreamClient::new(
            http_client,
            config.upstream.endpoint(),
            config.upstream.deadline(),
        );

        Ok(Self {
            config: Arc::new(config),
            interceptor: Arc::new(interceptor),
            default_pool,
            upstream,
        })
    }
}

/// Assign a request ID, expose it to handlers and echo it on the response.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let span = tracing::info_span!("request", request_id = %id.0);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai", post(handlers::relay))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::from_config(config)?;
    tracing::info!(
        endpoint = %state.upstream.endpoint(),
        rules = state.interceptor.len(),
        default_keys = state.default_pool.as_ref().map_or(0, |p| p.len()),
        "Relay configured"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting promptrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
