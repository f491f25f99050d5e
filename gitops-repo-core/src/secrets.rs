//! Credential storage for repository access
//!
//! Secrets are stored separately from configuration to avoid accidental sharing.
//! The secrets file is located at `~/.config/gitops-repo/secrets.toml` and must
//! have restrictive permissions (0600 on Unix).
//!
//! ```toml
//! [credentials."team-a/deploy"]
//! type = "basic-auth"
//! username = "deployer"
//! password = "hunter2"
//! email = "deployer@example.com"
//!
//! [credentials."team-b/bot"]
//! type = "bearer-token"
//! token = "ghp_xxxxxxxxxxxx"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// A stored credential, tagged by how the remote expects it
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Credential {
    /// Username plus password or personal access token
    BasicAuth {
        username: String,
        password: String,
        #[serde(default)]
        email: Option<String>,
    },
    /// Service-account style token, optionally with its own username
    BearerToken {
        token: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        email: Option<String>,
    },
    /// Opaque single-field secret
    SecretText {
        token: String,
        #[serde(default)]
        email: Option<String>,
    },
}

impl Credential {
    /// Username to present to the remote, falling back to the caller
    pub fn username_or<'a>(&'a self, caller: &'a str) -> &'a str {
        match self {
            Credential::BasicAuth { username, .. } => username.as_str(),
            Credential::BearerToken {
                username: Some(username),
                ..
            } => username.as_str(),
            Credential::BearerToken { username: None, .. } | Credential::SecretText { .. } => caller,
        }
    }

    /// The password or token part of the credential
    pub fn secret(&self) -> &str {
        match self {
            Credential::BasicAuth { password, .. } => password.as_str(),
            Credential::BearerToken { token, .. } | Credential::SecretText { token, .. } => token.as_str(),
        }
    }

    /// Commit author email, if the credential carries one
    pub fn email(&self) -> Option<&str> {
        match self {
            Credential::BasicAuth { email, .. }
            | Credential::BearerToken { email, .. }
            | Credential::SecretText { email, .. } => email.as_deref(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Credential::BasicAuth { .. } => "basic-auth",
            Credential::BearerToken { .. } => "bearer-token",
            Credential::SecretText { .. } => "secret-text",
        };
        f.debug_struct("Credential")
            .field("type", &kind)
            .field("email", &self.email())
            .finish_non_exhaustive()
    }
}

/// Resolves a credential reference to a stored secret
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a credential by reference (conventionally `namespace/name`)
    async fn credential(&self, reference: &str) -> Result<Credential>;
}

/// Secrets file contents
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    /// Credentials keyed by reference
    pub credentials: HashMap<String, Credential>,
}

impl Secrets {
    /// Load secrets from a specific file with permission checking
    ///
    /// Returns empty secrets if the file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file, using empty credential set");
            return Ok(Self::default());
        }

        // Check file permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(path).map_err(Error::Io)?;
            let mode = metadata.permissions().mode();

            // Check if file is readable by group or others (mode & 0o077)
            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. \
                     Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }

            debug!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "Secrets file permissions OK");
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut secrets: Secrets =
            toml::from_str(&contents).map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        // Trim whitespace from secrets
        for credential in secrets.credentials.values_mut() {
            match credential {
                Credential::BasicAuth { password, .. } => *password = password.trim().to_string(),
                Credential::BearerToken { token, .. } | Credential::SecretText { token, .. } => {
                    *token = token.trim().to_string()
                }
            }
        }

        Ok(secrets)
    }

    /// Insert or replace a credential
    pub fn insert(&mut self, reference: impl Into<String>, credential: Credential) {
        self.credentials.insert(reference.into(), credential);
    }
}

#[async_trait]
impl CredentialStore for Secrets {
    async fn credential(&self, reference: &str) -> Result<Credential> {
        self.credentials
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound(reference.to_string()))
    }
}

/// Credential store that re-reads its file on every lookup
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
}

impl SecretsFile {
    /// Create a store backed by the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for SecretsFile {
    async fn credential(&self, reference: &str) -> Result<Credential> {
        let path = self.path.clone();
        let secrets = tokio::task::spawn_blocking(move || Secrets::load_from_file(&path))
            .await
            .map_err(|e| Error::Other(format!("Secrets loader panicked: {}", e)))??;
        secrets.credential(reference).await
    }
}
