//! Refresh-credential storage
//!
//! Persists exactly one refresh-credential string under a fixed key. Two
//! interchangeable backends sit behind one `{load, save}` surface: a local
//! file and a remote single-key HTTP key-value service. Both are durable,
//! single-slot, last-write-wins; the token manager never notices which one
//! is configured.
//!
//! All file writes use atomic temp-file + rename to prevent corruption on
//! crash, with 0600 permissions since the file contains a live credential.

use std::path::{Path, PathBuf};

use common::Secret;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Fixed key the single refresh credential is stored under.
pub const CREDENTIAL_KEY: &str = "refresh_token";

/// Storage backend for the refresh credential, selected by configuration.
pub enum CredentialStore {
    File(FileStore),
    Remote(RemoteStore),
}

impl CredentialStore {
    /// Load the stored refresh credential, if any.
    pub async fn load(&self) -> Result<Option<String>> {
        match self {
            Self::File(store) => store.load().await,
            Self::Remote(store) => store.load().await,
        }
    }

    /// Overwrite the stored refresh credential (last write wins).
    pub async fn save(&self, credential: &str) -> Result<()> {
        match self {
            Self::File(store) => store.save(credential).await,
            Self::Remote(store) => store.save(credential).await,
        }
    }
}

/// Local-file backend: one credential string in one file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let credential = contents.trim();
                if credential.is_empty() {
                    return Ok(None);
                }
                debug!(path = %self.path.display(), "loaded refresh credential");
                Ok(Some(credential.to_owned()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no refresh credential file");
                Ok(None)
            }
            Err(e) => Err(Error::Store(format!(
                "reading credential file {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, credential: &str) -> Result<()> {
        write_atomic(&self.path, credential).await?;
        info!(path = %self.path.display(), "refresh credential saved");
        Ok(())
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, credential: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, credential.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp credential file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

/// Remote key-value backend: single key over plain HTTP.
///
/// `GET {base}/{key}` returns the credential in the body (404 = absent);
/// `PUT {base}/{key}` stores the request body. An optional bearer token
/// authenticates both calls.
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
}

impl RemoteStore {
    pub fn new(client: reqwest::Client, base_url: String, token: Option<Secret<String>>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        }
    }

    fn key_url(&self) -> String {
        format!("{}/{CREDENTIAL_KEY}", self.base_url)
    }

    async fn load(&self) -> Result<Option<String>> {
        let mut request = self.client.get(self.key_url());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Store(format!("credential store read failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            info!("no refresh credential in remote store");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Store(format!(
                "credential store read returned {status}"
            )));
        }

        let credential = response
            .text()
            .await
            .map_err(|e| Error::Store(format!("credential store read failed: {e}")))?;
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(None);
        }
        debug!("loaded refresh credential from remote store");
        Ok(Some(credential.to_owned()))
    }

    async fn save(&self, credential: &str) -> Result<()> {
        let mut request = self.client.put(self.key_url()).body(credential.to_owned());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Store(format!("credential store write failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Store(format!(
                "credential store write returned {status}"
            )));
        }
        info!("refresh credential saved to remote store");
        Ok(())
    }
}
