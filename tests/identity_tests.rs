//! Credential provider tests against mock identity endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use casechat::identity::{
    AuthError, ClientSecretProvider, FederatedProvider, IdentityConfig, IdentityMode,
    TokenProvider,
};

/// Stand-in for the platform metadata endpoint and the tenant token endpoint.
///
/// Captures the metadata query parameters, the `Metadata` header, and the
/// token-endpoint form fields for assertions.
struct MockIdentity {
    metadata_headers: Mutex<Vec<String>>,
    metadata_queries: Mutex<Vec<HashMap<String, String>>>,
    token_forms: Mutex<Vec<HashMap<String, String>>>,
    metadata_fails: AtomicBool,
    token_empty: AtomicBool,
}

impl MockIdentity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            metadata_headers: Mutex::new(Vec::new()),
            metadata_queries: Mutex::new(Vec::new()),
            token_forms: Mutex::new(Vec::new()),
            metadata_fails: AtomicBool::new(false),
            token_empty: AtomicBool::new(false),
        })
    }
}

async fn metadata_handler(
    State(mock): State<Arc<MockIdentity>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let metadata = headers
        .get("Metadata")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    mock.metadata_headers.lock().await.push(metadata);
    mock.metadata_queries.lock().await.push(params);

    if mock.metadata_fails.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "imds unavailable").into_response();
    }
    Json(json!({"access_token": "mi-token"})).into_response()
}

async fn token_handler(
    State(mock): State<Arc<MockIdentity>>,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    mock.token_forms.lock().await.push(form);

    if mock.token_empty.load(Ordering::SeqCst) {
        return Json(json!({"token_type": "Bearer"})).into_response();
    }
    Json(json!({"access_token": "target-token"})).into_response()
}

/// Bind the mock identity endpoints on an ephemeral port and return the
/// base URL (no trailing slash, usable as `authority_host`).
async fn spawn_mock_identity(mock: Arc<MockIdentity>) -> String {
    let router = Router::new()
        .route("/metadata/identity/oauth2/token", get(metadata_handler))
        .route("/{tenant}/oauth2/v2.0/token", post(token_handler))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn federated_config(base: &str) -> IdentityConfig {
    IdentityConfig {
        mode: IdentityMode::Federated,
        tenant_id: Some("tenant-1".to_string()),
        client_id: Some("client-1".to_string()),
        mi_client_id: Some("mi-1".to_string()),
        scope: Some("api://target/.default".to_string()),
        authority_host: base.to_string(),
        metadata_url: format!("{base}/metadata/identity/oauth2/token"),
        ..IdentityConfig::default()
    }
}

fn client_secret_config(base: &str) -> IdentityConfig {
    IdentityConfig {
        mode: IdentityMode::ClientSecret,
        tenant_id: Some("tenant-1".to_string()),
        client_id: Some("client-1".to_string()),
        client_secret: Some("s3cret".to_string()),
        scope: Some("api://target/.default".to_string()),
        authority_host: base.to_string(),
        ..IdentityConfig::default()
    }
}

/// The federated exchange queries the metadata endpoint, then presents the
/// managed-identity token as a client assertion to the tenant endpoint.
#[tokio::test]
async fn test_federated_exchange_wire_format() {
    let mock = MockIdentity::new();
    let base = spawn_mock_identity(mock.clone()).await;
    let provider = FederatedProvider::new(federated_config(&base)).unwrap();

    let credential = provider.acquire().await.unwrap();
    assert_eq!(credential.token, "target-token");

    let headers = mock.metadata_headers.lock().await;
    assert_eq!(headers[0], "true");
    let queries = mock.metadata_queries.lock().await;
    assert_eq!(queries[0]["api-version"], "2018-02-01");
    assert_eq!(queries[0]["resource"], "api://AzureADTokenExchange");
    assert_eq!(queries[0]["client_id"], "mi-1");

    let forms = mock.token_forms.lock().await;
    assert_eq!(forms[0]["grant_type"], "client_credentials");
    assert_eq!(forms[0]["client_id"], "client-1");
    assert_eq!(forms[0]["scope"], "api://target/.default");
    assert_eq!(
        forms[0]["client_assertion_type"],
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
    );
    // The assertion is the token handed out by the metadata endpoint.
    assert_eq!(forms[0]["client_assertion"], "mi-token");
}

/// The client-secret grant posts the shared secret and never touches the
/// metadata endpoint.
#[tokio::test]
async fn test_client_secret_grant_form_fields() {
    let mock = MockIdentity::new();
    let base = spawn_mock_identity(mock.clone()).await;
    let provider = ClientSecretProvider::new(client_secret_config(&base)).unwrap();

    let credential = provider.acquire().await.unwrap();
    assert_eq!(credential.token, "target-token");

    assert!(mock.metadata_queries.lock().await.is_empty());
    let forms = mock.token_forms.lock().await;
    assert_eq!(forms[0]["grant_type"], "client_credentials");
    assert_eq!(forms[0]["client_id"], "client-1");
    assert_eq!(forms[0]["client_secret"], "s3cret");
    assert_eq!(forms[0]["scope"], "api://target/.default");
    assert!(!forms[0].contains_key("client_assertion"));
}

/// A failing metadata endpoint surfaces as a status error carrying the
/// endpoint and body.
#[tokio::test]
async fn test_federated_surfaces_metadata_status() {
    let mock = MockIdentity::new();
    mock.metadata_fails.store(true, Ordering::SeqCst);
    let base = spawn_mock_identity(mock.clone()).await;
    let provider = FederatedProvider::new(federated_config(&base)).unwrap();

    let err = provider.acquire().await.unwrap_err();
    match err {
        AuthError::IdentityStatus {
            endpoint,
            status,
            body,
        } => {
            assert!(endpoint.ends_with("/metadata/identity/oauth2/token"));
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "imds unavailable");
        }
        other => panic!("expected IdentityStatus, got {other:?}"),
    }
    // The token endpoint was never reached.
    assert!(mock.token_forms.lock().await.is_empty());
}

/// A 200 token response without an access token is rejected as malformed.
#[tokio::test]
async fn test_missing_access_token_is_malformed() {
    let mock = MockIdentity::new();
    mock.token_empty.store(true, Ordering::SeqCst);
    let base = spawn_mock_identity(mock.clone()).await;
    let provider = ClientSecretProvider::new(client_secret_config(&base)).unwrap();

    let err = provider.acquire().await.unwrap_err();
    assert!(matches!(err, AuthError::MalformedToken(_)));
}
