//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (OAuth client secret, payments subscription key, remote store
//! token) are loaded from env vars or `*_file` paths, never stored in the
//! TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::Secret;
use payments_auth::{CredentialStore, FileStore, OAuthSettings, RemoteStore};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub payments: PaymentsConfig,
    pub credentials: CredentialsConfig,
}

/// Listener and front-end settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Directory the donation front end is served from
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Environment label exposed to the browser via /api/config
    pub environment: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// OAuth client registration with the payments processor
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the
    /// APP_CLIENT_SECRET env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub token_url: String,
    pub authorize_url: String,
    pub redirect_url: String,
}

/// Payments API settings
#[derive(Debug, Deserialize)]
pub struct PaymentsConfig {
    pub transaction_url: String,
    #[serde(skip)]
    pub subscription_key: Option<Secret<String>>,
    /// Path to a file containing the subscription key (alternative to the
    /// PAY_API_KEY env var)
    #[serde(default)]
    pub subscription_key_file: Option<PathBuf>,
    /// Browser-facing public key, served by /api/config
    #[serde(default)]
    pub public_key: Option<String>,
    /// Browser-facing payment configuration identifier, served by /api/config
    #[serde(default)]
    pub payment_config_id: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Refresh-credential storage backend selection
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub backend: CredentialBackend,
    /// File backend: path of the single-credential file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// Remote backend: base URL of the key-value service
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(skip)]
    pub remote_token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    File,
    Remote,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    100
}

fn require_http_url(value: &str, key: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{key} must start with http:// or https://, got: {value}"
        )))
    }
}

/// Resolve a secret from an env var, falling back to an optional file path.
fn resolve_secret(
    env_var: &'static str,
    file: Option<&Path>,
) -> common::Result<Option<Secret<String>>> {
    if let Some(secret) = Secret::from_env(env_var) {
        return Ok(Some(secret));
    }
    if let Some(path) = file {
        let value = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    Ok(None)
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, per secret:
    /// 1. env var (APP_CLIENT_SECRET / PAY_API_KEY / CREDENTIAL_STORE_TOKEN)
    /// 2. matching `*_file` path from the config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("oauth.client_id must be set".into()));
        }
        require_http_url(&config.oauth.token_url, "oauth.token_url")?;
        require_http_url(&config.oauth.authorize_url, "oauth.authorize_url")?;
        require_http_url(&config.oauth.redirect_url, "oauth.redirect_url")?;
        require_http_url(&config.payments.transaction_url, "payments.transaction_url")?;

        if config.payments.timeout_secs == 0 {
            return Err(common::Error::Config(
                "payments.timeout_secs must be greater than 0".into(),
            ));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        match config.credentials.backend {
            CredentialBackend::File => {
                if config.credentials.file_path.is_none() {
                    return Err(common::Error::Config(
                        "credentials.file_path is required for the file backend".into(),
                    ));
                }
            }
            CredentialBackend::Remote => match &config.credentials.remote_url {
                Some(url) => require_http_url(url, "credentials.remote_url")?,
                None => {
                    return Err(common::Error::Config(
                        "credentials.remote_url is required for the remote backend".into(),
                    ));
                }
            },
        }

        config.oauth.client_secret = resolve_secret(
            "APP_CLIENT_SECRET",
            config.oauth.client_secret_file.as_deref(),
        )?;
        if config.oauth.client_secret.is_none() {
            return Err(common::Error::MissingSecret("APP_CLIENT_SECRET"));
        }

        config.payments.subscription_key =
            resolve_secret("PAY_API_KEY", config.payments.subscription_key_file.as_deref())?;
        if config.payments.subscription_key.is_none() {
            return Err(common::Error::MissingSecret("PAY_API_KEY"));
        }

        // Optional: only the remote backend can need it
        config.credentials.remote_token = resolve_secret("CREDENTIAL_STORE_TOKEN", None)?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("donation-relay.toml")
    }

    /// OAuth settings for the token manager and authorization flow.
    pub fn oauth_settings(&self) -> common::Result<OAuthSettings> {
        let client_secret = self
            .oauth
            .client_secret
            .clone()
            .ok_or(common::Error::MissingSecret("APP_CLIENT_SECRET"))?;
        Ok(OAuthSettings {
            token_url: self.oauth.token_url.clone(),
            authorize_url: self.oauth.authorize_url.clone(),
            redirect_url: self.oauth.redirect_url.clone(),
            client_id: self.oauth.client_id.clone(),
            client_secret,
        })
    }

    /// Build the configured credential store backend.
    pub fn credential_store(&self, client: reqwest::Client) -> common::Result<CredentialStore> {
        match self.credentials.backend {
            CredentialBackend::File => {
                let path = self.credentials.file_path.clone().ok_or_else(|| {
                    common::Error::Config("credentials.file_path is required".into())
                })?;
                Ok(CredentialStore::File(FileStore::new(path)))
            }
            CredentialBackend::Remote => {
                let url = self.credentials.remote_url.clone().ok_or_else(|| {
                    common::Error::Config("credentials.remote_url is required".into())
                })?;
                Ok(CredentialStore::Remote(RemoteStore::new(
                    client,
                    url,
                    self.credentials.remote_token.clone(),
                )))
            }
        }
    }
}
