//! Integration tests for the relay endpoint.
//!
//! Verifies that:
//! - Upstream SSE deltas are streamed back as raw text
//! - The upstream payload carries only model/messages/temperature/stream
//! - Intercepted prompts are answered without any upstream call
//! - Validation failures produce 400 JSON envelopes
//! - Upstream rejections pass through status and body verbatim
//! - Network failures and deadline overruns produce 500, including a
//!   rejection whose body stalls
//! - A malformed event mid-stream aborts the response body
//!
//! Uses wiremock as the upstream provider and `tower::ServiceExt::oneshot`
//! against the promptrelay router.

use std::time::{Duration, Instant};

use axum::body::Body;
use futures::StreamExt;
use http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use promptrelay::config::Config;
use promptrelay::proxy::{create_router, AppState, REQUEST_ID_HEADER};

const STREAM_BODY: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"ab\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"cd\"}}]}\n\ndata: [DONE]\n\n";

const PINCHE_PROMPT: &str = "Necesito una pinche función para";
const PINCHE_RESPONSE: &str =
    "I need a function for... [Please provide more details about what functionality you need]";

/// Build the router against `base_url`; `extra` is appended to the TOML.
fn app_with(base_url: &str, timeout_ms: u64, api_key: Option<&str>, extra: &str) -> axum::Router {
    let key_line = api_key
        .map(|k| format!("api_key = \"{}\"", k))
        .unwrap_or_default();
    let toml = format!(
        "[upstream]\nbase_url = \"{}\"\ntimeout_ms = {}\n{}\n{}",
        base_url, timeout_ms, key_line, extra
    );
    let config = Config::parse_str(&toml).expect("valid test config");
    create_router(AppState::from_config(config).expect("app state"))
}

fn app(base_url: &str) -> axum::Router {
    app_with(base_url, 5_000, Some("k1"), "")
}

fn relay_request(body: serde_json::Value) -> Request<Body> {
    Request::post("/api/ai")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn user_request(content: &str) -> serde_json::Value {
    json!({
        "messages": [{"role": "user", "content": content}],
        "temperature": 0.5,
        "model": "sonar"
    })
}

/// Read the whole body, returning (status, bytes).
async fn read_body(response: axum::response::Response) -> (StatusCode, Vec<u8>) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    (status, bytes.to_vec())
}

async fn error_message(response: axum::response::Response) -> (StatusCode, String) {
    let (status, body) = read_body(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json envelope");
    (
        status,
        json["error"]["message"].as_str().unwrap_or_default().to_string(),
    )
}

async fn sse_upstream(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Streaming success path
// ============================================================================

#[tokio::test]
async fn test_streams_deltas_as_raw_text() {
    let server = sse_upstream(STREAM_BODY).await;

    let response = app(&server.uri())
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();

    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "abcd");
}

#[tokio::test]
async fn test_upstream_payload_and_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer k1"))
        .and(body_json(json!({
            "model": "sonar",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"}
            ],
            "temperature": 0.5,
            "stream": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let body = json!({
        "messages": [
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hello", "id": 42}
        ],
        "temperature": 0.5,
        "model": "sonar",
        "password": "",
        "key": "k1"
    });
    let response = app(&server.uri()).oneshot(relay_request(body)).await.unwrap();

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"abcd");
}

#[tokio::test]
async fn test_request_key_overrides_default_pool() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer client-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut body = user_request("hello");
    body["key"] = json!(" , client-key ,");
    let response = app(&server.uri()).oneshot(relay_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Interception
// ============================================================================

#[tokio::test]
async fn test_intercepted_prompt_skips_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(0)
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(relay_request(user_request(PINCHE_PROMPT)))
        .await
        .unwrap();

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), PINCHE_RESPONSE);
}

#[tokio::test]
async fn test_intercept_needs_no_credential() {
    let response = app_with("http://127.0.0.1:1", 100, None, "")
        .oneshot(relay_request(user_request(PINCHE_PROMPT)))
        .await
        .unwrap();

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), PINCHE_RESPONSE);
}

#[tokio::test]
async fn test_first_declared_rule_wins() {
    let extra = r#"
[interceptor]
builtin_rules = false

[[interceptor.rules]]
needle = "alpha"
response = "first"

[[interceptor.rules]]
needle = "beta"
response = "second"
"#;
    let response = app_with("http://127.0.0.1:1", 100, Some("k1"), extra)
        .oneshot(relay_request(user_request("beta then alpha")))
        .await
        .unwrap();

    let (_, body) = read_body(response).await;
    assert_eq!(body, b"first");
}

#[tokio::test]
async fn test_only_last_message_is_checked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(STREAM_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let body = json!({
        "messages": [
            {"role": "user", "content": PINCHE_PROMPT},
            {"role": "assistant", "content": "earlier answer"},
            {"role": "user", "content": "something else"}
        ]
    });
    let response = app(&server.uri()).oneshot(relay_request(body)).await.unwrap();

    let (_, body) = read_body(response).await;
    assert_eq!(body, b"abcd");
}

// ============================================================================
// Validation errors
// ============================================================================

#[tokio::test]
async fn test_wrong_password_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let extra = "[auth]\npassword = \"hunter2\"";
    let mut body = user_request(PINCHE_PROMPT);
    body["password"] = json!("wrong");

    let response = app_with(&server.uri(), 5_000, Some("k1"), extra)
        .oneshot(relay_request(body))
        .await
        .unwrap();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.contains("password"), "message: {}", message);
}

#[tokio::test]
async fn test_correct_password_accepted() {
    let extra = "[auth]\npassword = \"hunter2\"";
    let mut body = user_request(PINCHE_PROMPT);
    body["password"] = json!("hunter2");

    let response = app_with("http://127.0.0.1:1", 100, Some("k1"), extra)
        .oneshot(relay_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_messages_rejected() {
    let response = app("http://127.0.0.1:1")
        .oneshot(relay_request(json!({"messages": [], "model": "sonar"})))
        .await
        .unwrap();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message, "No input text was provided.");
}

#[tokio::test]
async fn test_invalid_json_body_rejected() {
    let request = Request::post("/api/ai")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app("http://127.0.0.1:1").oneshot(request).await.unwrap();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_no_credential_rejected() {
    let app = app_with("http://127.0.0.1:1", 100, None, "");
    let response = app
        .clone()
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();
    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.contains("API key"));

    let mut body = user_request("hello");
    body["key"] = json!("   ");
    let response = app.oneshot(relay_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blank_default_key_treated_as_missing() {
    let response = app_with("http://127.0.0.1:1", 100, Some(" , "), "")
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Upstream failures
// ============================================================================

#[tokio::test]
async fn test_upstream_rejection_passthrough() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(r#"{"error":"bad key"}"#, "application/json"))
        .mount(&server)
        .await;

    let response = app(&server.uri())
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, br#"{"error":"bad key"}"#);
}

#[tokio::test]
async fn test_upstream_unreachable_is_500() {
    // Port 1 is never listening in the test environment.
    let response = app("http://127.0.0.1:1")
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!message.is_empty());
}

#[tokio::test]
async fn test_deadline_exceeded_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(STREAM_BODY, "text/event-stream")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let start = Instant::now();
    let response = app_with(&server.uri(), 100, Some("k1"), "")
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(message.contains("100ms"), "message: {}", message);
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

/// Upstream that answers 401 with the start of a body, then stalls.
async fn stalled_rejection_upstream() -> String {
    let reject = || async {
        let chunks = futures::stream::once(async {
            Ok::<_, std::convert::Infallible>(bytes::Bytes::from_static(b"{\"error\":"))
        })
        .chain(futures::stream::pending());
        (StatusCode::UNAUTHORIZED, Body::from_stream(chunks))
    };
    let router = axum::Router::new().route("/chat/completions", axum::routing::post(reject));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_stalled_rejection_body_hits_deadline() {
    let base_url = stalled_rejection_upstream().await;

    let start = Instant::now();
    let response = app_with(&base_url, 300, Some("k1"), "")
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    let (status, message) = error_message(response).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(message.contains("401"), "message: {}", message);
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_malformed_event_aborts_body() {
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"ab\"}}]}\n\ndata: not-json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"cd\"}}]}\n\ndata: [DONE]\n\n";
    let server = sse_upstream(body).await;

    let response = app(&server.uri())
        .oneshot(relay_request(user_request("hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = axum::body::to_bytes(response.into_body(), 1_048_576).await;
    assert!(result.is_err(), "truncated stream must surface as an error");
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let response = app("http://127.0.0.1:1")
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}
