//! OAuth credential management for the payments processor
//!
//! Standalone library with no dependency on the relay binary: token
//! exchange/refresh against the processor's token endpoint, the single-slot
//! refresh-credential store (file or remote key-value), and the token
//! manager that keeps a valid bearer credential in memory.
//!
//! Credential flow:
//! 1. Operator opens `/auth/login`; the relay redirects to
//!    `token::build_authorization_url()`
//! 2. Callback exchanges the code via `token::exchange_code()`
//! 3. `TokenManager::install()` caches the access credential and persists
//!    the refresh credential
//! 4. Request-time `TokenManager::get_valid_token()` serves from cache and
//!    refreshes via `token::refresh_token()` when the credential is within
//!    60 seconds of expiry

pub mod error;
pub mod manager;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use manager::{AccessCredential, TokenManager, EXPIRY_MARGIN_MILLIS};
pub use store::{CredentialStore, FileStore, RemoteStore, CREDENTIAL_KEY};
pub use token::{
    build_authorization_url, exchange_code, refresh_token, OAuthSettings, TokenResponse,
};
