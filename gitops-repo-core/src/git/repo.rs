//! Synchronous facade over one local clone

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use git2::{Oid, Repository};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::auth::{AuthContext, Transport};
use super::clone::{open_clone, RepositoryClone, WorkTreeLease};
use super::history::CommitIndex;
use super::url::upload_root;
use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::{Error, Result};

/// Name of the single remote every clone tracks
pub const ORIGIN: &str = "origin";

/// Repository configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoConfig {
    /// `user.name`
    pub user_name: Option<String>,
    /// `user.email`
    pub user_email: Option<String>,
    /// URL of the `origin` remote
    pub remote_url: Option<String>,
}

/// A git repository wrapper bound to one clone and its credentials
///
/// Not `Sync`: a facade is used from one blocking task at a time.
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the clone root
    root: PathBuf,
    auth: AuthContext,
    deadline: Option<Instant>,
    max_file_size: u64,
    index: Arc<Mutex<CommitIndex>>,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the facade for a resolved clone
    pub fn open(clone: &RepositoryClone) -> Result<Self> {
        let mut repo = Self::open_path(clone.path(), clone.auth().clone())?;
        repo.index = clone.commit_index();
        Ok(repo)
    }

    /// Open a clone at an explicit path
    pub fn open_path(path: impl AsRef<Path>, auth: AuthContext) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let repo = open_clone(&root)?;
        Ok(Self {
            repo,
            root,
            auth,
            deadline: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            index: Arc::new(Mutex::new(CommitIndex::default())),
        })
    }

    /// Abort network operations once `deadline` passes
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Largest blob returned inline or accepted for writing
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Get the repository root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging directory for this clone's uploads
    pub fn upload_root(&self) -> PathBuf {
        upload_root(&self.root)
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Get access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn transport(&self, operation: &'static str) -> Transport<'_> {
        Transport::new(&self.auth, self.deadline, operation)
    }

    pub(crate) fn with_commit_index<T>(&self, f: impl FnOnce(&mut CommitIndex) -> Result<T>) -> Result<T> {
        let mut index = self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut index)
    }

    /// Reject leases taken on a different clone
    pub(crate) fn check_lease(&self, lease: &WorkTreeLease) -> Result<()> {
        if lease.path() != self.root {
            return Err(Error::invalid(format!(
                "work tree lease for {} does not cover {}",
                lease.path().display(),
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Get the current branch name
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            // Detached HEAD
            Ok(None)
        }
    }

    /// Commit at the tip of `branch`, preferring the local branch over `origin/<branch>`
    pub(crate) fn branch_tip(&self, branch: &str) -> Result<Oid> {
        if branch.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        for name in [format!("refs/heads/{}", branch), format!("refs/remotes/{}/{}", ORIGIN, branch)] {
            if let Ok(reference) = self.repo.find_reference(&name) {
                return Ok(reference.peel_to_commit()?.id());
            }
        }
        Err(Error::BranchNotFound(branch.to_string()))
    }

    /// Read `user.name`, `user.email` and the origin URL
    pub fn get_config(&self) -> Result<RepoConfig> {
        let config = self.repo.config()?.snapshot()?;
        let read = |key: &str| config.get_string(key).ok().filter(|v| !v.is_empty());
        let remote_url = match self.repo.find_remote(ORIGIN) {
            Ok(remote) => remote.url().map(str::to_string),
            Err(_) => None,
        };
        Ok(RepoConfig {
            user_name: read("user.name"),
            user_email: read("user.email"),
            remote_url,
        })
    }

    /// Persist the given configuration; fields left as `None` are untouched
    pub fn update_config(&self, update: Option<&RepoConfig>) -> Result<RepoConfig> {
        let update = update.ok_or_else(|| Error::invalid("configuration is required"))?;
        if update.remote_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(Error::invalid("remote URL must not be empty"));
        }

        let mut config = self.repo.config()?.open_level(git2::ConfigLevel::Local)?;
        if let Some(name) = &update.user_name {
            config.set_str("user.name", name)?;
        }
        if let Some(email) = &update.user_email {
            config.set_str("user.email", email)?;
        }
        if let Some(url) = &update.remote_url {
            self.repo.remote_set_url(ORIGIN, url)?;
            info!(root = %self.root.display(), url, "Updated origin URL");
        }
        debug!(root = %self.root.display(), "Updated repository configuration");
        self.get_config()
    }
}
