//! Checkout relay
//!
//! Accepts the browser's `{transactionToken, amount}` body, validates it,
//! obtains a bearer credential from the token manager, and forwards one
//! POST to the processor's transaction endpoint. The processor's success
//! response is relayed verbatim; failures come back as a generic 500 with
//! the detail logged server-side.

use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::{metrics, AppState};

/// Checkout request from the donation form. Field names are camelCase on
/// the wire. Absent fields deserialize to their empty values and are
/// rejected by the presence checks below.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub transaction_token: String,
    /// Donation amount in major currency units (e.g. 25.5 dollars)
    #[serde(default)]
    pub amount: f64,
}

/// Convert a major-unit amount to integer minor units (cents).
///
/// Plain numeric conversion, not currency-aware: `round()` is
/// half-away-from-zero, so 0.005 becomes 1.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// POST /api/payments/v1/checkout/transaction
pub async fn checkout_handler(
    State(state): State<AppState>,
    Json(body): Json<CheckoutRequest>,
) -> Response {
    let started = Instant::now();
    state.counters.checkout_requests.fetch_add(1, Ordering::Relaxed);

    let response = match relay_transaction(&state, body).await {
        Ok(response) => response,
        Err(e) => {
            state.counters.checkout_errors.fetch_add(1, Ordering::Relaxed);
            e.into_response()
        }
    };

    metrics::record_request(
        "checkout",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn relay_transaction(state: &AppState, body: CheckoutRequest) -> Result<Response, ApiError> {
    // Validation happens before any outbound call. A zero amount counts as
    // missing, matching the presence check the donation form relies on.
    if body.transaction_token.trim().is_empty() {
        return Err(ApiError::MissingField("transactionToken"));
    }
    if body.amount == 0.0 {
        return Err(ApiError::MissingField("amount"));
    }

    let amount_minor = to_minor_units(body.amount);
    debug!(amount = body.amount, amount_minor, "relaying checkout");

    let token = state.tokens.get_valid_token().await?;

    let response = state
        .tokens
        .http()
        .post(&state.transaction_url)
        .bearer_auth(&token)
        .header("Bb-Api-Subscription-Key", state.subscription_key.expose())
        .json(&serde_json::json!({
            "authorization_token": body.transaction_token,
            "amount": amount_minor,
        }))
        .timeout(state.upstream_timeout)
        .send()
        .await
        .map_err(|e| {
            metrics::record_upstream_error("transaction");
            ApiError::Upstream(format!("transaction request failed: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        metrics::record_upstream_error("transaction");
        return Err(ApiError::Upstream(format!(
            "processor returned {status}: {detail}"
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .cloned();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Upstream(format!("reading processor response: {e}")))?;

    info!(status = status.as_u16(), "checkout transaction completed");

    // Relay the processor's body verbatim with the same success status
    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    builder
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Upstream(format!("building relay response: {e}")))
}
