//! Remote URL parsing and clone path derivation

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Parsed remote location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    /// Host, with port if one was given (empty for local paths)
    pub host: String,
    /// Path on the host, without leading slash
    pub path: String,
    /// URL handed to libgit2, unchanged from the input
    pub clone_url: String,
}

impl RepoUrl {
    /// Parse a remote URL
    ///
    /// Supports:
    /// - `https://host[:port]/owner/repo.git` (and any other `scheme://`)
    /// - `git@host:owner/repo.git`
    /// - local paths such as `/srv/git/repo.git`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidSpec("remote URL is empty".to_string()));
        }

        // Handle scheme URLs (https://, ssh://, file://)
        if input.contains("://") {
            let url = url::Url::parse(input)
                .map_err(|e| Error::InvalidSpec(format!("invalid remote URL {}: {}", input, e)))?;
            let mut host = url.host_str().unwrap_or("").to_string();
            if let Some(port) = url.port() {
                host = format!("{}:{}", host, port);
            }
            return Ok(Self {
                host,
                path: url.path().trim_start_matches('/').to_string(),
                clone_url: input.to_string(),
            });
        }

        // Handle scp-like URLs (e.g., git@github.com:owner/repo.git)
        if !input.starts_with('/') && !input.starts_with('.') {
            if let Some((authority, path)) = input.split_once(':') {
                let host = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
                if !host.is_empty() && !path.is_empty() {
                    return Ok(Self {
                        host: host.to_string(),
                        path: path.trim_start_matches('/').to_string(),
                        clone_url: input.to_string(),
                    });
                }
            }
        }

        // Local path
        Ok(Self {
            host: String::new(),
            path: input.trim_start_matches('/').to_string(),
            clone_url: input.to_string(),
        })
    }

    /// Relative storage location: host + path with `:` turned into `/`
    pub fn storage_path(&self) -> Result<PathBuf> {
        let joined = if self.host.is_empty() {
            self.path.clone()
        } else {
            format!("{}/{}", self.host, self.path)
        };

        let mut path = PathBuf::new();
        for component in joined.replace(':', "/").split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(Error::InvalidSpec(format!(
                        "remote URL {} contains a parent-directory component",
                        self.clone_url
                    )))
                }
                other => path.push(other),
            }
        }

        if path.as_os_str().is_empty() {
            return Err(Error::InvalidSpec(format!("remote URL {} has no path", self.clone_url)));
        }
        Ok(path)
    }
}

/// Deterministic clone location: `<base>/<namespace>/<host>/<path>`
pub fn clone_path(base_dir: &Path, namespace: &str, url: &RepoUrl) -> Result<PathBuf> {
    if namespace.is_empty() || namespace == "." || namespace == ".." || namespace.contains(['/', '\\']) {
        return Err(Error::InvalidSpec(format!("invalid namespace '{}'", namespace)));
    }
    Ok(base_dir.join(namespace).join(url.storage_path()?))
}

/// Staging directory for uploads, a sibling of the clone directory
pub fn upload_root(clone_path: &Path) -> PathBuf {
    let name = clone_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    clone_path.with_file_name(format!("{}.uploads", name))
}
