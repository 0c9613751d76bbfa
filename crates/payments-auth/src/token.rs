//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial authorization by the operator)
//! 2. Token refresh (request-time, when the cached credential nears expiry)
//!
//! Both operations POST a form-encoded grant to the processor's token
//! endpoint. This is a confidential client: the registered client id and
//! secret accompany every grant.

use common::Secret;
use serde::Deserialize;

use crate::error::{Error, Result};

/// OAuth client settings for the processor integration.
///
/// All values come from configuration: the token and authorization URLs
/// differ between the processor's sandbox and production environments, and
/// the redirect URL must match the one registered with the application.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub token_url: String,
    pub authorize_url: String,
    pub redirect_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; the token
/// manager converts it to an absolute unix-millisecond timestamp when
/// caching. `refresh_token` is optional: the processor returns one on the
/// initial exchange and only sometimes rotates it on refresh.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Exchange an authorization code for tokens (initial authorization).
///
/// The operator has authorized in their browser and the processor redirected
/// back with a one-time code. The registered redirect URL must be echoed in
/// the grant for the exchange to succeed.
pub async fn exchange_code(
    client: &reqwest::Client,
    oauth: &OAuthSettings,
    code: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&oauth.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &oauth.redirect_url),
            ("client_id", &oauth.client_id),
            ("client_secret", oauth.client_secret.expose()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenEndpoint(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenEndpoint(format!("invalid token response: {e}")))
}

/// Refresh an access token using a stored refresh credential.
///
/// The refresh grant omits `redirect_uri`; the processor's token endpoint
/// only requires it for the authorization-code grant.
pub async fn refresh_token(
    client: &reqwest::Client,
    oauth: &OAuthSettings,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&oauth.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", &oauth.client_id),
            ("client_secret", oauth.client_secret.expose()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenEndpoint(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenEndpoint(format!("invalid refresh response: {e}")))
}

/// Build the authorization redirect URL for the operator login flow.
///
/// The `state` parameter is echoed back by the processor in the callback
/// and checked there before any exchange is attempted.
pub fn build_authorization_url(oauth: &OAuthSettings, state: &str) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope=payments&state={}",
        oauth.authorize_url,
        oauth.client_id,
        urlencoded(&oauth.redirect_url),
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    s.replace(':', "%3A").replace('/', "%2F").replace('&', "%26")
}
