//! Local clone management
//!
//! Every logical repository maps to exactly one clone directory under the
//! configured base directory. The first access clones it; later accesses open
//! the existing directory. Mutations are serialised per clone through a
//! [`WorkTreeLease`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::Repository;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::auth::{AuthContext, Transport};
use super::history::CommitIndex;
use super::url::{clone_path, upload_root, RepoUrl};
use crate::descriptor::{DescriptorStore, RepositoryId};
use crate::secrets::CredentialStore;
use crate::{Error, Result};

/// Shared per-path state that outlives individual resolutions
#[derive(Debug, Default)]
struct CloneSlot {
    lock: Arc<AsyncMutex<()>>,
    /// Held while the directory is being created or removed
    cloning: AsyncMutex<()>,
    index: Arc<Mutex<CommitIndex>>,
}

/// A resolved repository: where its clone lives and how to reach its remote
#[derive(Debug)]
pub struct RepositoryClone {
    id: RepositoryId,
    path: PathBuf,
    url: RepoUrl,
    auth: AuthContext,
    lock: Arc<AsyncMutex<()>>,
    index: Arc<Mutex<CommitIndex>>,
    freshly_cloned: bool,
}

impl RepositoryClone {
    #[cfg(test)]
    pub(crate) fn new(id: RepositoryId, path: PathBuf, url: RepoUrl, auth: AuthContext) -> Self {
        Self {
            id,
            path,
            url,
            auth,
            lock: Arc::new(AsyncMutex::new(())),
            index: Arc::new(Mutex::new(CommitIndex::default())),
            freshly_cloned: false,
        }
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    /// Clone directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staging directory for uploads
    pub fn upload_root(&self) -> PathBuf {
        upload_root(&self.path)
    }

    pub fn url(&self) -> &RepoUrl {
        &self.url
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Whether this resolution created the clone
    pub fn freshly_cloned(&self) -> bool {
        self.freshly_cloned
    }

    pub(crate) fn commit_index(&self) -> Arc<Mutex<CommitIndex>> {
        Arc::clone(&self.index)
    }

    /// Wait for exclusive use of the working tree
    pub async fn lock_worktree(&self) -> WorkTreeLease {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        debug!(repository = %self.id, "Acquired work tree lease");
        WorkTreeLease {
            path: self.path.clone(),
            _guard: guard,
        }
    }

    /// Take the lease without waiting, if nobody holds it
    pub fn try_lock_worktree(&self) -> Option<WorkTreeLease> {
        Arc::clone(&self.lock).try_lock_owned().ok().map(|guard| WorkTreeLease {
            path: self.path.clone(),
            _guard: guard,
        })
    }

    /// Open the clone, or clone it from the remote if the directory is absent
    ///
    /// An existing directory that cannot be opened is an error; it is never
    /// deleted and re-cloned implicitly.
    fn ensure_local(&self, deadline: Option<Instant>) -> Result<bool> {
        if self.path.exists() {
            open_clone(&self.path)?;
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            repository = %self.id,
            url = %self.url.clone_url,
            path = %self.path.display(),
            "Cloning repository"
        );
        let transport = Transport::new(&self.auth, deadline, "clone");
        transport.check_deadline()?;
        RepoBuilder::new()
            .fetch_options(transport.fetch_options())
            .clone(&self.url.clone_url, &self.path)
            .map_err(|e| transport.map_error(e))?;
        Ok(true)
    }
}

/// Open an existing clone, refusing bare repositories
pub(crate) fn open_clone(path: &Path) -> Result<Repository> {
    let repo = Repository::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if repo.is_bare() {
        return Err(Error::Config(format!(
            "Clone at {} is a bare repository",
            path.display()
        )));
    }
    Ok(repo)
}

/// Exclusive right to mutate one clone's working tree
#[derive(Debug)]
pub struct WorkTreeLease {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl WorkTreeLease {
    /// Clone directory this lease guards
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves repository identities to local clones
pub struct RepositoryManager {
    base_dir: PathBuf,
    timeout: Duration,
    descriptors: Arc<dyn DescriptorStore>,
    credentials: Arc<dyn CredentialStore>,
    slots: Mutex<HashMap<PathBuf, Arc<CloneSlot>>>,
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("base_dir", &self.base_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RepositoryManager {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        timeout: Duration,
        descriptors: Arc<dyn DescriptorStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            timeout,
            descriptors,
            credentials,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Root under which all clones live
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn slot(&self, path: &Path) -> Arc<CloneSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }

    /// Resolve a repository to its local clone, cloning on first access
    ///
    /// Calling this twice for the same identity yields the same path; the
    /// second call opens rather than re-clones.
    pub async fn resolve(&self, id: &RepositoryId, caller: &str) -> Result<Arc<RepositoryClone>> {
        self.resolve_until(id, caller, Some(Instant::now() + self.timeout))
            .await
    }

    /// [`resolve`](Self::resolve) with an explicit deadline for the initial clone
    pub async fn resolve_until(
        &self,
        id: &RepositoryId,
        caller: &str,
        deadline: Option<Instant>,
    ) -> Result<Arc<RepositoryClone>> {
        let descriptor = self.descriptors.lookup(id).await?;
        descriptor.validate(id)?;

        let credential = match &descriptor.credential {
            Some(reference) => Some(self.credentials.credential(reference).await?),
            None => None,
        };
        let auth = AuthContext::from_parts(caller, credential.as_ref(), &descriptor.tls)?;
        let url = RepoUrl::parse(&descriptor.url)?;
        let path = clone_path(&self.base_dir, &id.namespace, &url)?;
        let slot = self.slot(&path);

        let mut clone = RepositoryClone {
            id: id.clone(),
            path,
            url,
            auth,
            lock: Arc::clone(&slot.lock),
            index: Arc::clone(&slot.index),
            freshly_cloned: false,
        };

        // Never open a directory another task is still cloning into; the
        // work tree lease stays free so reads do not wait for mutations
        let _cloning = slot.cloning.lock().await;
        let clone = tokio::task::spawn_blocking(move || {
            clone.freshly_cloned = clone.ensure_local(deadline)?;
            Ok::<_, Error>(clone)
        })
        .await
        .map_err(|e| Error::Other(format!("Clone task panicked: {}", e)))??;

        if clone.freshly_cloned {
            info!(repository = %id, path = %clone.path.display(), "Clone ready");
        } else {
            debug!(repository = %id, path = %clone.path.display(), "Opened existing clone");
        }
        Ok(Arc::new(clone))
    }

    /// Clone directory for `id`, derived from its descriptor alone
    pub async fn clone_path(&self, id: &RepositoryId) -> Result<PathBuf> {
        let descriptor = self.descriptors.lookup(id).await?;
        descriptor.validate(id)?;
        let url = RepoUrl::parse(&descriptor.url)?;
        clone_path(&self.base_dir, &id.namespace, &url)
    }

    /// Remove a repository's clone and its staging directory
    ///
    /// Never opens or clones the directory, so a corrupt clone can still be
    /// removed. Waits for any in-flight mutation on the clone to finish first.
    pub async fn delete_clone(&self, id: &RepositoryId) -> Result<bool> {
        let path = self.clone_path(id).await?;
        let slot = self.slot(&path);
        let _lease = Arc::clone(&slot.lock).lock_owned().await;
        let _cloning = slot.cloning.lock().await;
        let uploads = upload_root(&path);

        let removed = tokio::task::spawn_blocking(move || -> Result<bool> {
            let existed = path.exists();
            if existed {
                std::fs::remove_dir_all(&path)?;
            }
            if uploads.exists() {
                if let Err(e) = std::fs::remove_dir_all(&uploads) {
                    warn!(path = %uploads.display(), error = %e, "Failed to remove upload staging directory");
                }
            }
            Ok(existed)
        })
        .await
        .map_err(|e| Error::Other(format!("Delete task panicked: {}", e)))??;

        if let Ok(mut index) = slot.index.lock() {
            index.clear();
        }
        info!(repository = %id, removed, "Deleted clone");
        Ok(removed)
    }
}
