//! Service-specific error types
//!
//! One policy for error-detail exposure everywhere: client-facing bodies
//! are generic, upstream detail goes to the log with a request id. The
//! variants carry the detail so the conversion point is also the logging
//! point.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// Request-level failures surfaced to the browser or the operator.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Client omitted a required checkout field. Reported before any
    /// outbound call is made.
    #[error("Missing {0}")]
    MissingField(&'static str),

    /// No usable credential and refresh is not possible; the operator must
    /// re-run the authorization flow.
    #[error("no usable credential")]
    NeedsReauthorization,

    /// The processor rejected the call or was unreachable.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Required environment configuration is absent.
    #[error("missing configuration value: {0}")]
    ConfigMissing(&'static str),
}

impl From<payments_auth::Error> for ApiError {
    fn from(e: payments_auth::Error) -> Self {
        match e {
            payments_auth::Error::NeedsReauthorization => Self::NeedsReauthorization,
            other => Self::Upstream(other.to_string()),
        }
    }
}

fn json_error(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": message,
        "request_id": request_id,
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        match self {
            Self::MissingField(field) => {
                warn!(request_id = %request_id, field, "request rejected, missing field");
                json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("Missing {field}"),
                    &request_id,
                )
            }
            Self::NeedsReauthorization => {
                error!(request_id = %request_id, "no usable credential, operator must re-authorize");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to refresh access token. Please (re)authorize the application.",
                    &request_id,
                )
            }
            Self::Upstream(detail) => {
                // Detail is logged here and never relayed to the client
                error!(request_id = %request_id, detail = %detail, "checkout failed upstream");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error completing checkout",
                    &request_id,
                )
            }
            Self::ConfigMissing(key) => {
                error!(request_id = %request_id, key, "required configuration value absent");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration is incomplete",
                    &request_id,
                )
            }
        }
    }
}
