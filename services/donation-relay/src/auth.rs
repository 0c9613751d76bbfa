//! Operator authorization flow
//!
//! Two endpoints with no internal state: `/auth/login` redirects the
//! operator's browser to the processor's authorization page, and
//! `/auth/callback` exchanges the returned code for credentials and hands
//! them to the token manager.
//!
//! The anti-forgery `state` value is the fixed constant the processor
//! integration was registered with, not a per-session nonce. That is a
//! known CSRF weakness, recorded in DESIGN.md rather than silently changed.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use payments_auth::token;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{metrics, AppState};

/// Fixed anti-forgery value sent with the authorization redirect and
/// checked in the callback.
pub const AUTH_STATE: &str = "scc_auth_state";

/// GET /auth/login — redirect the operator to the processor for authorization.
pub async fn login_handler(State(state): State<AppState>) -> Response {
    let url = token::build_authorization_url(state.tokens.oauth(), AUTH_STATE);
    info!("redirecting operator to processor authorization page");
    metrics::record_request("auth_login", 302, 0.0);
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

/// Query parameters the processor sends back to the redirect URL.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /auth/callback — exchange the authorization code for credentials.
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let started = Instant::now();
    let response = handle_callback(&state, params).await;
    metrics::record_request(
        "auth_callback",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn handle_callback(state: &AppState, params: CallbackParams) -> Response {
    if let Some(error) = params.error {
        warn!(error = %error, "authorization error returned in callback");
        return (
            StatusCode::BAD_REQUEST,
            format!("Authorization error: {error}"),
        )
            .into_response();
    }

    // Anti-forgery check before any exchange is attempted
    let code = match (params.code.as_deref(), params.state.as_deref()) {
        (Some(code), Some(AUTH_STATE)) if !code.is_empty() => code,
        _ => {
            warn!("invalid authorization response: missing code or state mismatch");
            return (
                StatusCode::BAD_REQUEST,
                "Invalid authorization response.".to_string(),
            )
                .into_response();
        }
    };

    match token::exchange_code(state.tokens.http(), state.tokens.oauth(), code).await {
        Ok(response) => {
            state.tokens.install(&response).await;
            info!("initial authorization completed");
            (
                StatusCode::OK,
                "Authorization successful! You may now close this window.".to_string(),
            )
                .into_response()
        }
        Err(e) => {
            // No state is mutated on a failed exchange; detail stays in the log
            metrics::record_upstream_error("token_exchange");
            error!(error = %e, "authorization code exchange failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authorization failed.".to_string(),
            )
                .into_response()
        }
    }
}
