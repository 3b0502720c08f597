//! Test utilities and common setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use casechat::api::{AppState, ChatSettings, create_router};
use casechat::identity::{AuthResult, Credential, StaticTokenProvider, TokenCache, TokenProvider};
use casechat::upstream::{ChatClient, UpstreamConfig};

/// Stand-in for the experiment API.
///
/// Answers `500` for the first `fail_times` requests, `401` for the first
/// `unauthorized_times`, then `200` with the configured body. Captures every
/// request body and Authorization header for assertions.
pub struct MockUpstream {
    pub fail_times: AtomicU32,
    pub unauthorized_times: AtomicU32,
    pub response: Mutex<Value>,
    pub requests: Mutex<Vec<Value>>,
    pub auth_headers: Mutex<Vec<String>>,
}

impl MockUpstream {
    /// Mock that immediately answers with the given body.
    pub fn replying(response: Value) -> Arc<Self> {
        Arc::new(Self {
            fail_times: AtomicU32::new(0),
            unauthorized_times: AtomicU32::new(0),
            response: Mutex::new(response),
            requests: Mutex::new(Vec::new()),
            auth_headers: Mutex::new(Vec::new()),
        })
    }

    /// Canonical single-reply response body.
    pub fn hello() -> Arc<Self> {
        Self::replying(json!({
            "chatHistory": {
                "messages": [
                    {"role": "assistant", "content": "Hello"}
                ]
            }
        }))
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

async fn experiment_handler(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    mock.auth_headers.lock().await.push(auth);
    mock.requests.lock().await.push(body);

    if mock
        .fail_times
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if mock
        .unauthorized_times
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::UNAUTHORIZED, "token rejected").into_response();
    }

    let response = mock.response.lock().await.clone();
    Json(response).into_response()
}

/// Bind the mock upstream on an ephemeral port and return its base URL.
pub async fn spawn_mock_upstream(mock: Arc<MockUpstream>) -> String {
    let router = Router::new()
        .route("/experiment/{id}", post(experiment_handler))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/")
}

/// Upstream config pointed at the mock, with fast retries for tests.
pub fn test_upstream_config(api_url: String) -> UpstreamConfig {
    UpstreamConfig {
        api_url,
        experiment_id: "exp-test".to_string(),
        timeout_secs: 5,
        retry_delay_ms: 25,
        max_attempts: 5,
    }
}

/// Create a test application wired to the given mock upstream.
pub async fn test_app(mock: Arc<MockUpstream>) -> Router {
    let api_url = spawn_mock_upstream(mock).await;
    let tokens = TokenCache::new(Arc::new(StaticTokenProvider::new("test-token")));
    let upstream = ChatClient::new(test_upstream_config(api_url));
    create_router(AppState::new(tokens, upstream, ChatSettings::default()))
}

/// Provider that hands out `token-1`, `token-2`, ... and counts calls.
pub struct SequenceTokenProvider {
    pub calls: AtomicUsize,
}

impl SequenceTokenProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenProvider for SequenceTokenProvider {
    async fn acquire(&self) -> AuthResult<Credential> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential {
            token: format!("token-{call}"),
        })
    }
}
