//! Donation checkout relay
//!
//! Single-binary service that:
//! 1. Keeps an OAuth 2.0 bearer credential alive against the payments
//!    processor (cache, refresh-on-expiry, operator re-authorization flow)
//! 2. Relays validated checkout requests to the processor's transaction
//!    endpoint
//! 3. Serves the donation front end's static assets and public config

mod auth;
mod checkout;
mod config;
mod error;
mod metrics;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use payments_auth::TokenManager;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::ApiError;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub transaction_url: String,
    pub subscription_key: Secret<String>,
    pub upstream_timeout: Duration,
    pub public_config: PublicConfig,
    pub counters: RelayCounters,
    pub prometheus: PrometheusHandle,
}

/// Environment-derived values the browser front end is allowed to see.
#[derive(Clone)]
pub struct PublicConfig {
    pub public_key: Option<String>,
    pub payment_config_id: Option<String>,
    pub environment: String,
}

/// Process-lifetime counters reported by /health.
#[derive(Clone)]
pub struct RelayCounters {
    pub started_at: Instant,
    pub checkout_requests: Arc<AtomicU64>,
    pub checkout_errors: Arc<AtomicU64>,
}

impl RelayCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            checkout_requests: Arc::new(AtomicU64::new(0)),
            checkout_errors: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Build the axum router with all routes and shared state.
///
/// API routes take precedence; everything else falls through to the static
/// front end. A concurrency limit bounds simultaneous in-flight requests.
fn build_router(state: AppState, max_connections: usize, static_dir: &Path) -> Router {
    Router::new()
        .route(
            "/api/payments/v1/checkout/transaction",
            post(checkout::checkout_handler),
        )
        .route("/auth/login", get(auth::login_handler))
        .route("/auth/callback", get(auth::callback_handler))
        .route("/api/config", get(config_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local development reads secrets from a .env file; in production the
    // env vars come from the process environment
    dotenvy::dotenv().ok();

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting donation-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        environment = %config.server.environment,
        credential_backend = ?config.credentials.backend,
        "configuration loaded"
    );

    // One HTTP client for every outbound call: token endpoint, transaction
    // endpoint, and (if configured) the remote credential store
    let client = reqwest::Client::new();

    let store = config.credential_store(client.clone())?;
    let oauth = config.oauth_settings()?;
    let tokens = Arc::new(TokenManager::new(client, oauth, store));

    let subscription_key = config
        .payments
        .subscription_key
        .clone()
        .ok_or(common::Error::MissingSecret("PAY_API_KEY"))?;

    let state = AppState {
        tokens,
        transaction_url: config.payments.transaction_url.clone(),
        subscription_key,
        upstream_timeout: Duration::from_secs(config.payments.timeout_secs),
        public_config: PublicConfig {
            public_key: config.payments.public_key.clone(),
            payment_config_id: config.payments.payment_config_id.clone(),
            environment: config.server.environment.clone(),
        },
        counters: RelayCounters::new(),
        prometheus,
    };

    let app = build_router(
        state,
        config.server.max_connections,
        &config.server.static_dir,
    );

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// GET /api/config — public configuration for the donation front end.
///
/// Only browser-safe values are exposed; a missing processor value is a
/// deployment fault reported as 500 rather than a silent empty field.
async fn config_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let public_key = state
        .public_config
        .public_key
        .clone()
        .ok_or(ApiError::ConfigMissing("payments.public_key"))?;
    let payment_config = state
        .public_config
        .payment_config_id
        .clone()
        .ok_or(ApiError::ConfigMissing("payments.payment_config_id"))?;

    Ok(axum::Json(serde_json::json!({
        "publicKey": public_key,
        "paymentConfig": payment_config,
        "environment": state.public_config.environment,
    })))
}

/// Health endpoint: uptime, checkout counters, and whether an access
/// credential is currently cached (false means the next checkout will
/// need a refresh or re-authorization).
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.counters.started_at.elapsed().as_secs();
    let requests = state.counters.checkout_requests.load(Ordering::Relaxed);
    let errors = state.counters.checkout_errors.load(Ordering::Relaxed);
    let credential_cached = state.tokens.cached_credential().await.is_some();

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "uptime_seconds": uptime,
            "checkout_requests": requests,
            "checkout_errors": errors,
            "credential_cached": credential_cached,
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use payments_auth::{CredentialStore, FileStore, OAuthSettings, TokenResponse};
    use tower::ServiceExt;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Create a PrometheusHandle for tests without installing a global
    /// recorder (only one global recorder can exist per process).
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// Build test state with a file credential store in `dir` and all
    /// outbound URLs pointing at the given mock server.
    fn test_state(dir: &tempfile::TempDir, mock_uri: &str) -> AppState {
        let oauth = OAuthSettings {
            token_url: format!("{mock_uri}/token"),
            authorize_url: "https://oauth.processor.test/authorization".into(),
            redirect_url: "https://relay.example.org/auth/callback".into(),
            client_id: "app-123".into(),
            client_secret: Secret::new("secret-456".into()),
        };
        let store = CredentialStore::File(FileStore::new(dir.path().join("refresh_token.txt")));
        let tokens = Arc::new(TokenManager::new(reqwest::Client::new(), oauth, store));

        AppState {
            tokens,
            transaction_url: format!("{mock_uri}/payments/v1/checkout/transaction"),
            subscription_key: Secret::new("sub-key".into()),
            upstream_timeout: Duration::from_secs(5),
            public_config: PublicConfig {
                public_key: Some("pk_test".into()),
                payment_config_id: Some("cfg_1".into()),
                environment: "test".into(),
            },
            counters: RelayCounters::new(),
            prometheus: test_prometheus_handle(),
        }
    }

    fn test_router(state: AppState, dir: &tempfile::TempDir) -> Router {
        build_router(state, 100, &dir.path().join("public"))
    }

    fn checkout_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/payments/v1/checkout/transaction")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn checkout_missing_fields_rejected_without_outbound_calls() {
        let server = MockServer::start().await;
        // Any outbound call would violate the validate-first contract
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .clone()
            .oneshot(checkout_request(r#"{"amount": 25.5}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Missing transactionToken"));

        let response = app
            .oneshot(checkout_request(r#"{"transactionToken": "tok_abc"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Missing amount"));
    }

    #[tokio::test]
    async fn checkout_relays_minor_units_and_processor_response() {
        let server = MockServer::start().await;
        // 25.5 major units must arrive as 2550 minor units
        Mock::given(method("POST"))
            .and(path("/payments/v1/checkout/transaction"))
            .and(header("authorization", "Bearer at_live"))
            .and(header("Bb-Api-Subscription-Key", "sub-key"))
            .and(body_json(serde_json::json!({
                "authorization_token": "tok_abc",
                "amount": 2550,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "txn_1"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        // A cached credential means no token endpoint traffic
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, &server.uri());
        state
            .tokens
            .install(&TokenResponse {
                access_token: "at_live".into(),
                refresh_token: None,
                expires_in: 3600,
            })
            .await;

        let response = test_router(state, &dir)
            .oneshot(checkout_request(
                r#"{"transactionToken": "tok_abc", "amount": 25.5}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({"id": "txn_1"}),
            "processor response must be relayed verbatim"
        );
    }

    #[tokio::test]
    async fn checkout_upstream_failure_returns_generic_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/v1/checkout/transaction"))
            .respond_with(
                ResponseTemplate::new(402)
                    .set_body_json(serde_json::json!({"error": "card_declined"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, &server.uri());
        state
            .tokens
            .install(&TokenResponse {
                access_token: "at_live".into(),
                refresh_token: None,
                expires_in: 3600,
            })
            .await;

        let response = test_router(state, &dir)
            .oneshot(checkout_request(
                r#"{"transactionToken": "tok_abc", "amount": 10}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(body.contains("Error completing checkout"));
        assert!(
            !body.contains("card_declined"),
            "upstream detail must not leak to the client: {body}"
        );
    }

    #[tokio::test]
    async fn checkout_without_credentials_requires_reauthorization() {
        let server = MockServer::start().await;
        // Empty store: no refresh attempt and no transaction call at all
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(checkout_request(
                r#"{"transactionToken": "tok_abc", "amount": 10}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.contains("(re)authorize"));
    }

    #[tokio::test]
    async fn login_redirects_to_processor_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get("location")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("https://oauth.processor.test/authorization?"));
        assert!(location.contains("response_type=code"));
        assert!(location.contains("client_id=app-123"));
        assert!(location.contains("scope=payments"));
        assert!(location.contains("state=scc_auth_state"));
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch_regardless_of_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=xyz&state=forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(
            body_string(response)
                .await
                .contains("Invalid authorization response.")
        );
    }

    #[tokio::test]
    async fn callback_surfaces_processor_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?error=access_denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(
            body_string(response)
                .await
                .contains("Authorization error: access_denied")
        );
    }

    #[tokio::test]
    async fn callback_exchange_installs_and_persists_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=xyz"))
            .and(body_string_contains("client_id=app-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, &server.uri());
        let tokens = state.tokens.clone();
        let app = test_router(state, &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=xyz&state=scc_auth_state")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("Authorization successful"));

        // Refresh credential landed in the store
        let stored = tokio::fs::read_to_string(dir.path().join("refresh_token.txt"))
            .await
            .unwrap();
        assert_eq!(stored, "r");

        // Access credential cached with expiry ~3600s out
        let cached = tokens.cached_credential().await.unwrap();
        assert_eq!(cached.token, "a");
        let now_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let delta = cached.expires_at_millis.saturating_sub(now_millis);
        assert!(
            (3_500_000..=3_600_000).contains(&delta),
            "expiry should sit ~3600s out, got {delta}ms"
        );
    }

    #[tokio::test]
    async fn callback_exchange_failure_mutates_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, &server.uri());
        let tokens = state.tokens.clone();
        let app = test_router(state, &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=bad&state=scc_auth_state")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.contains("Authorization failed."));

        assert!(tokens.cached_credential().await.is_none());
        assert!(
            !dir.path().join("refresh_token.txt").exists(),
            "failed exchange must not touch the credential store"
        );
    }

    #[tokio::test]
    async fn config_endpoint_serves_public_values() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "publicKey": "pk_test",
                "paymentConfig": "cfg_1",
                "environment": "test",
            })
        );
    }

    #[tokio::test]
    async fn config_endpoint_reports_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let mut state = test_state(&dir, &server.uri());
        state.public_config.public_key = None;
        let app = test_router(state, &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health_reports_counters_and_credential_state() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let app = test_router(test_state(&dir, &server.uri()), &dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checkout_requests"], 0);
        assert_eq!(body["credential_cached"], false);
    }
}
