//! Error types for credential operations

/// Errors from token acquisition and credential storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token endpoint rejected the request: {0}")]
    TokenEndpoint(String),

    #[error("no usable credential, (re)authorize the application")]
    NeedsReauthorization,

    #[error("credential store error: {0}")]
    Store(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
