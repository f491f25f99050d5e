//! Configuration management for the repository service
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GITOPS_REPO_*)
//! 3. Config file (~/.config/gitops-repo/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum size of a single uploaded or downloaded file (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Where clones and staged uploads live, and how long uploads are kept
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all clones
    pub base_dir: PathBuf,

    /// How long a staged upload survives before it is deleted
    #[serde(with = "humantime_serde")]
    pub upload_ttl: Duration,

    /// Size limit for single-file uploads and inline downloads
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            upload_ttl: Duration::from_secs(10 * 60),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Deadline applied to each clone, fetch, remote listing and push
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Locations of the file-backed descriptor and credential stores
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Repository descriptors (`[[repository]]` entries)
    pub repositories: PathBuf,

    /// Credentials, must be mode 0600
    pub secrets: PathBuf,
}

impl Default for StoresConfig {
    fn default() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gitops-repo");
        Self {
            repositories: dir.join("repositories.toml"),
            secrets: dir.join("secrets.toml"),
        }
    }
}

/// Identity used when neither credentials nor the caller supply one
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Acting user name when the caller is anonymous
    pub default_user: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_user: "gitops-repo".to_string(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Clone and upload storage
    pub storage: StorageConfig,
    /// Transport settings
    pub network: NetworkConfig,
    /// Descriptor and credential files
    pub stores: StoresConfig,
    /// Fallback identity
    pub identity: IdentityConfig,
}

/// Default clone root: `~/.cache/gitops-repo/repos`
fn default_base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gitops-repo")
        .join("repos")
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/gitops-repo/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitops-repo").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GITOPS_REPO_BASE_DIR: clone root
    /// - GITOPS_REPO_UPLOAD_TTL: staged upload lifetime (e.g. "10m")
    /// - GITOPS_REPO_TIMEOUT: transport deadline (e.g. "30s")
    /// - GITOPS_REPO_USER: default acting user
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("GITOPS_REPO_BASE_DIR") {
            self.storage.base_dir = PathBuf::from(dir);
        }

        if let Ok(ttl) = std::env::var("GITOPS_REPO_UPLOAD_TTL") {
            self.storage.upload_ttl = parse_duration("GITOPS_REPO_UPLOAD_TTL", &ttl)?;
        }

        if let Ok(timeout) = std::env::var("GITOPS_REPO_TIMEOUT") {
            self.network.timeout = parse_duration("GITOPS_REPO_TIMEOUT", &timeout)?;
        }

        if let Ok(user) = std::env::var("GITOPS_REPO_USER") {
            self.identity.default_user = user;
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, base_dir: Option<PathBuf>, timeout: Option<Duration>) -> Self {
        if let Some(dir) = base_dir {
            self.storage.base_dir = dir;
        }

        if let Some(t) = timeout {
            self.network.timeout = t;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(base_dir: Option<PathBuf>, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()?
            .with_cli_overrides(base_dir, timeout))
    }
}

fn parse_duration(var: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("{} has an invalid duration '{}': {}", var, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.storage.upload_ttl, Duration::from_secs(600));
        assert!(config.storage.base_dir.ends_with("gitops-repo/repos"));
        assert_eq!(config.identity.default_user, "gitops-repo");
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default()
            .with_cli_overrides(Some(PathBuf::from("/srv/clones")), Some(Duration::from_secs(30)));

        assert_eq!(config.storage.base_dir, PathBuf::from("/srv/clones"));
        assert_eq!(config.network.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[storage]
base_dir = "/var/lib/gitops-repo"
upload_ttl = "90s"
max_file_size = 1024

[network]
timeout = "1m"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.base_dir, PathBuf::from("/var/lib/gitops-repo"));
        assert_eq!(config.storage.upload_ttl, Duration::from_secs(90));
        assert_eq!(config.storage.max_file_size, 1024);
        assert_eq!(config.network.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
[identity]
default_user = "flux"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        // storage should use defaults
        assert_eq!(config.storage.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.identity.default_user, "flux");
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("X", "soon").is_err());
        assert_eq!(parse_duration("X", "2m").unwrap(), Duration::from_secs(120));
    }
}
