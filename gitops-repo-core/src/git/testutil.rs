//! Test helpers: a bare "remote" on local disk plus a seed repository that pushes to it

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use git2::build::{CheckoutBuilder, TreeUpdateBuilder};
use git2::{FileMode, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature, Time};
use tempfile::TempDir;

use super::auth::AuthContext;
use super::repo::GitRepo;
use crate::config::Config;
use crate::descriptor::{Descriptors, RepositoryDescriptor, RepositoryId};
use crate::git::RepositoryManager;
use crate::secrets::Secrets;
use crate::service::RepositoryService;

static CLOCK: AtomicI64 = AtomicI64::new(1_700_000_000);

/// Strictly increasing commit timestamps so history order is deterministic
fn next_time() -> Time {
    Time::new(CLOCK.fetch_add(60, Ordering::SeqCst), 0)
}

/// Initialise a non-bare repository whose HEAD points at `main`
pub(crate) fn init_work_repo(path: &Path) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main");
    let repo = Repository::init_opts(path, &options).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Seed").unwrap();
        config.set_str("user.email", "seed@example.com").unwrap();
    }
    repo
}

/// Write (`Some`) or delete (`None`) files, then commit everything on HEAD
pub(crate) fn commit_files(repo: &Repository, files: &[(&str, Option<&str>)], message: &str) -> Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    for (path, content) in files {
        let full = workdir.join(path);
        match content {
            Some(content) => {
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&full, content).unwrap();
            }
            None => {
                std::fs::remove_file(&full).unwrap();
            }
        }
    }

    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::new("Seed", "seed@example.com", &next_time()).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

/// Commit a tree derived from the first parent's, without touching HEAD or the work tree
///
/// Builds merges and side branches directly from object ids.
pub(crate) fn commit_on(
    repo: &Repository,
    parents: &[Oid],
    files: &[(&str, Option<&str>)],
    message: &str,
) -> Oid {
    let parents: Vec<git2::Commit<'_>> = parents.iter().map(|oid| repo.find_commit(*oid).unwrap()).collect();
    let base = parents[0].tree().unwrap();
    let mut update = TreeUpdateBuilder::new();
    for (path, content) in files {
        match content {
            Some(content) => {
                let blob = repo.blob(content.as_bytes()).unwrap();
                update.upsert(*path, blob, FileMode::Blob);
            }
            None => {
                update.remove(*path);
            }
        }
    }
    let tree = repo.find_tree(update.create_updated(repo, &base).unwrap()).unwrap();

    let signature = Signature::new("Seed", "seed@example.com", &next_time()).unwrap();
    let parents: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(None, &signature, &signature, message, &tree, &parents)
        .unwrap()
}

/// A bare remote at `<tmp>/remote.git` seeded with `README.md` on `main`
pub(crate) struct RemoteFixture {
    dir: TempDir,
    remote: PathBuf,
    seed: Repository,
}

impl RemoteFixture {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.git");

        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head("main");
        Repository::init_opts(&remote, &options).unwrap();

        let seed = init_work_repo(&dir.path().join("seed"));
        seed.remote("origin", remote.to_str().unwrap()).unwrap();

        let fixture = Self { dir, remote, seed };
        fixture.push(&[("README.md", Some("# app\n"))], "Initial commit");
        fixture
    }

    pub(crate) fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    pub(crate) fn base_dir(&self) -> PathBuf {
        self.dir.path().join("clones")
    }

    pub(crate) fn id(&self) -> RepositoryId {
        RepositoryId::new("team-a", "app")
    }

    pub(crate) fn descriptors(&self) -> Descriptors {
        let mut descriptors = Descriptors::new();
        descriptors.insert(
            self.id(),
            RepositoryDescriptor {
                url: self.remote_url(),
                public: true,
                ..Default::default()
            },
        );
        descriptors
    }

    pub(crate) fn manager(&self) -> RepositoryManager {
        RepositoryManager::new(
            self.base_dir(),
            Duration::from_secs(60),
            Arc::new(self.descriptors()),
            Arc::new(Secrets::default()),
        )
    }

    pub(crate) fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.base_dir = self.base_dir();
        config.storage.upload_ttl = Duration::from_secs(30);
        config.storage.max_file_size = 1024;
        config.network.timeout = Duration::from_secs(60);
        config
    }

    pub(crate) fn service(&self) -> RepositoryService {
        self.service_with(self.config())
    }

    pub(crate) fn service_with(&self, config: Config) -> RepositoryService {
        RepositoryService::new(config, Arc::new(self.descriptors()), Arc::new(Secrets::default()))
    }

    /// A plain clone outside the manager, for facade-level tests
    pub(crate) fn local_repo(&self) -> GitRepo {
        let path = self.dir.path().join("local");
        if !path.exists() {
            git2::build::RepoBuilder::new()
                .clone(&self.remote_url(), &path)
                .unwrap();
        }
        GitRepo::open_path(&path, AuthContext::anonymous("tester")).unwrap()
    }

    /// Commit on the seed's `main` and push it
    pub(crate) fn push(&self, files: &[(&str, Option<&str>)], message: &str) -> Oid {
        self.push_branch("main", files, message)
    }

    /// Commit on `branch` (created from the seed's current HEAD if needed) and push it
    pub(crate) fn push_branch(&self, branch: &str, files: &[(&str, Option<&str>)], message: &str) -> Oid {
        let refname = format!("refs/heads/{}", branch);
        if self.seed.find_reference(&refname).is_err() {
            if let Ok(head) = self.seed.head().and_then(|h| h.peel_to_commit()) {
                self.seed.branch(branch, &head, false).unwrap();
            }
        }
        self.seed.set_head(&refname).unwrap();
        if self.seed.head().is_ok() {
            self.seed
                .checkout_head(Some(CheckoutBuilder::new().force()))
                .unwrap();
        }

        let oid = commit_files(&self.seed, files, message);
        let mut remote = self.seed.find_remote("origin").unwrap();
        remote
            .push(&[format!("+{}:{}", refname, refname).as_str()], None)
            .unwrap();
        oid
    }

    /// Remote tip of `branch`
    pub(crate) fn remote_tip(&self, branch: &str) -> Oid {
        let remote = Repository::open_bare(&self.remote).unwrap();
        let reference = remote.find_reference(&format!("refs/heads/{}", branch)).unwrap();
        reference.target().unwrap()
    }

    /// Read a file from the remote tip of `branch`
    pub(crate) fn remote_file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let remote = Repository::open_bare(&self.remote).unwrap();
        let commit = remote.find_commit(self.remote_tip(branch)).unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = remote.find_blob(entry.id()).ok()?;
        Some(blob.content().to_vec())
    }
}
