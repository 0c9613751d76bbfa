//! In-memory access-credential cache with refresh-on-expiry
//!
//! The token manager is an explicitly owned state object injected into the
//! handlers that need a bearer credential; there is no module-level global.
//! It holds at most one current access credential; a credential within the
//! 60-second safety margin of expiry is treated as already expired so a
//! token cannot lapse mid-flight during an outbound call.
//!
//! The cache mutex is held across the refresh exchange, so concurrent
//! callers that find the credential expired share a single refresh outcome
//! instead of racing duplicate grants at the token endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::CredentialStore;
use crate::token::{self, OAuthSettings, TokenResponse};

/// Safety margin before true expiry. A credential expiring within this
/// window is treated as expired.
pub const EXPIRY_MARGIN_MILLIS: u64 = 60_000;

/// A cached bearer credential with its absolute expiry instant.
///
/// `expires_at_millis` is a unix timestamp in milliseconds, computed at
/// install time from the token endpoint's `expires_in` seconds delta.
#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub token: String,
    pub expires_at_millis: u64,
}

impl AccessCredential {
    /// Whether the credential is still usable at `now`, margin included.
    fn is_fresh(&self, now_millis: u64) -> bool {
        self.expires_at_millis > now_millis + EXPIRY_MARGIN_MILLIS
    }
}

/// Owns the cached access credential and the means to replace it.
pub struct TokenManager {
    http: reqwest::Client,
    oauth: OAuthSettings,
    store: CredentialStore,
    cached: Mutex<Option<AccessCredential>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, oauth: OAuthSettings, store: CredentialStore) -> Self {
        Self {
            http,
            oauth,
            store,
            cached: Mutex::new(None),
        }
    }

    /// OAuth settings this manager was built with (for the login redirect
    /// and the callback exchange, which share the same client registration).
    pub fn oauth(&self) -> &OAuthSettings {
        &self.oauth
    }

    /// HTTP client shared with the rest of the relay's outbound calls.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Return a bearer credential valid for at least the safety margin.
    ///
    /// Serves from cache without any I/O when possible. Otherwise loads the
    /// refresh credential and performs a refresh exchange. Absent credential
    /// and failed refresh both degrade to `NeedsReauthorization`; the remedy
    /// in either case is the operator re-running the authorization flow.
    /// A failed refresh clears the cache so a later call starts clean; the
    /// persisted refresh credential is never deleted here.
    pub async fn get_valid_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(credential) = cached.as_ref() {
            if credential.is_fresh(now_millis()) {
                debug!("using cached access credential");
                return Ok(credential.token.clone());
            }
        }

        let refresh = match self.store.load().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!("no refresh credential stored, authorization required");
                return Err(Error::NeedsReauthorization);
            }
            Err(e) => {
                warn!(error = %e, "credential store load failed");
                return Err(Error::NeedsReauthorization);
            }
        };

        match token::refresh_token(&self.http, &self.oauth, &refresh).await {
            Ok(response) => {
                let credential = AccessCredential {
                    token: response.access_token.clone(),
                    expires_at_millis: now_millis() + response.expires_in * 1000,
                };
                *cached = Some(credential);
                info!(
                    expires_in = response.expires_in,
                    "access credential obtained via refresh"
                );
                metrics::counter!("token_refresh_total", "outcome" => "success").increment(1);

                // Persist a rotated refresh credential; losing the write is
                // not fatal to this call — the access credential is usable.
                if let Some(new_refresh) = response.refresh_token.as_deref() {
                    if new_refresh != refresh {
                        if let Err(e) = self.store.save(new_refresh).await {
                            warn!(error = %e, "failed to persist rotated refresh credential");
                        }
                    }
                }

                Ok(response.access_token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing cached credential");
                metrics::counter!("token_refresh_total", "outcome" => "failure").increment(1);
                *cached = None;
                Err(Error::NeedsReauthorization)
            }
        }
    }

    /// Install credentials obtained by the authorization-callback exchange.
    ///
    /// Caches the access credential and persists the refresh credential when
    /// the response carries one. A store failure is logged and swallowed;
    /// the in-flight access credential is still usable for its lifetime.
    pub async fn install(&self, response: &TokenResponse) {
        let credential = AccessCredential {
            token: response.access_token.clone(),
            expires_at_millis: now_millis() + response.expires_in * 1000,
        };
        *self.cached.lock().await = Some(credential);
        info!(
            expires_in = response.expires_in,
            "access credential installed"
        );

        if let Some(refresh) = response.refresh_token.as_deref() {
            if let Err(e) = self.store.save(refresh).await {
                warn!(error = %e, "failed to persist refresh credential");
            }
        }
    }

    /// Snapshot of the cached credential, if any.
    pub async fn cached_credential(&self) -> Option<AccessCredential> {
        self.cached.lock().await.clone()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_respects_the_margin() {
        let now = now_millis();
        let fresh = AccessCredential {
            token: "a".into(),
            expires_at_millis: now + EXPIRY_MARGIN_MILLIS + 5_000,
        };
        assert!(fresh.is_fresh(now));

        // Inside the margin counts as expired even though the wall-clock
        // expiry has not passed yet
        let expiring = AccessCredential {
            token: "a".into(),
            expires_at_millis: now + EXPIRY_MARGIN_MILLIS - 5_000,
        };
        assert!(!expiring.is_fresh(now));

        let expired = AccessCredential {
            token: "a".into(),
            expires_at_millis: now.saturating_sub(1),
        };
        assert!(!expired.is_fresh(now));
    }
}
