//! Repository descriptors: which remote backs a logical repository
//!
//! The descriptor file lives at `~/.config/gitops-repo/repositories.toml`:
//!
//! ```toml
//! [[repository]]
//! namespace = "team-a"
//! name = "platform"
//! url = "https://git.example.com/team-a/platform.git"
//! credential = "team-a/deploy"
//! ca_bundle = "/etc/ssl/internal-ca.pem"
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Namespaced identity of a logical repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RepositoryId {
    pub namespace: String,
    pub name: String,
}

impl RepositoryId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How server certificates are checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Accept any certificate
    pub insecure_skip_verify: bool,
    /// PEM bundle of additionally trusted certificates
    pub ca_bundle: Option<Vec<u8>>,
}

/// Everything needed to reach the remote behind a [`RepositoryId`]
#[derive(Debug, Clone, Default)]
pub struct RepositoryDescriptor {
    pub url: String,
    /// Reference into the credential store
    pub credential: Option<String>,
    /// Public repositories need no credential
    pub public: bool,
    pub tls: TlsPolicy,
}

impl RepositoryDescriptor {
    /// Check the descriptor is usable for cloning
    pub fn validate(&self, id: &RepositoryId) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidSpec(format!("repository {} has no remote URL", id)));
        }
        if self.credential.is_none() && !self.public {
            return Err(Error::InvalidSpec(format!(
                "repository {} has no credential reference and is not public",
                id
            )));
        }
        Ok(())
    }
}

/// Looks up the descriptor for a repository identity
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    async fn lookup(&self, id: &RepositoryId) -> Result<RepositoryDescriptor>;
}

/// In-memory descriptor table
#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    entries: HashMap<RepositoryId, RepositoryDescriptor>,
}

impl Descriptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one for the same id
    pub fn insert(&mut self, id: RepositoryId, descriptor: RepositoryDescriptor) {
        self.entries.insert(id, descriptor);
    }
}

#[async_trait]
impl DescriptorStore for Descriptors {
    async fn lookup(&self, id: &RepositoryId) -> Result<RepositoryDescriptor> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RepositoryNotFound(id.to_string()))
    }
}

/// One `[[repository]]` entry as written on disk
#[derive(Debug, Clone, Deserialize, Serialize)]
struct DescriptorEntry {
    namespace: String,
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    insecure_skip_tls: bool,
    #[serde(default)]
    ca_bundle: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DescriptorFileContents {
    #[serde(default)]
    repository: Vec<DescriptorEntry>,
}

/// Descriptor store backed by a TOML file, re-read on every lookup
#[derive(Debug, Clone)]
pub struct FileDescriptorStore {
    path: PathBuf,
}

impl FileDescriptorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse the whole file into an in-memory table
    pub fn load(path: &Path) -> Result<Descriptors> {
        let mut descriptors = Descriptors::new();
        if !path.exists() {
            return Ok(descriptors);
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let parsed: DescriptorFileContents = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse repository descriptors: {}", e)))?;

        for entry in parsed.repository {
            let ca_bundle = match &entry.ca_bundle {
                Some(ca_path) => Some(std::fs::read(ca_path).map_err(|e| {
                    Error::Config(format!("Failed to read CA bundle {}: {}", ca_path.display(), e))
                })?),
                None => None,
            };
            descriptors.insert(
                RepositoryId::new(entry.namespace, entry.name),
                RepositoryDescriptor {
                    url: entry.url,
                    credential: entry.credential,
                    public: entry.public,
                    tls: TlsPolicy {
                        insecure_skip_verify: entry.insecure_skip_tls,
                        ca_bundle,
                    },
                },
            );
        }

        Ok(descriptors)
    }
}

#[async_trait]
impl DescriptorStore for FileDescriptorStore {
    async fn lookup(&self, id: &RepositoryId) -> Result<RepositoryDescriptor> {
        let path = self.path.clone();
        let descriptors = tokio::task::spawn_blocking(move || Self::load(&path))
            .await
            .map_err(|e| Error::Other(format!("Descriptor loader panicked: {}", e)))??;
        descriptors.lookup(id).await
    }
}
