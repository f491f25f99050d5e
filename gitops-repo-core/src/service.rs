//! Async repository service
//!
//! Resolves the repository, then runs the synchronous git work on the
//! blocking pool. Mutations hold the clone's work tree lease for their whole
//! pipeline; reads do not touch the working tree and run unlocked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Config;
use crate::descriptor::{DescriptorStore, FileDescriptorStore, RepositoryId};
use crate::git::{
    AddFilesInput, BranchInfo, Commit, DeleteFilesInput, FetchedFile, FileInfo, GetFileRequest, GitRepo,
    RepoConfig, RepositoryClone, RepositoryManager, WorkTree,
};
use crate::pagination::{ListOptions, Page};
use crate::secrets::{CredentialStore, SecretsFile};
use crate::staging::{StagedUpload, UploadStaging};
use crate::{Error, Result};

/// Who is calling, and until when they will wait for the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller<'a> {
    pub name: &'a str,
    /// Overrides the configured network timeout for this call
    pub deadline: Option<Instant>,
}

impl<'a> Caller<'a> {
    pub fn new(name: &'a str) -> Self {
        Self { name, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

impl<'a> From<&'a str> for Caller<'a> {
    fn from(name: &'a str) -> Self {
        Self::new(name)
    }
}

impl<'a> From<&'a String> for Caller<'a> {
    fn from(name: &'a String) -> Self {
        Self::new(name)
    }
}

/// Entry point for all repository operations
#[derive(Debug)]
pub struct RepositoryService {
    config: Config,
    manager: RepositoryManager,
    staging: UploadStaging,
}

impl RepositoryService {
    pub fn new(
        config: Config,
        descriptors: Arc<dyn DescriptorStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let manager = RepositoryManager::new(
            config.storage.base_dir.clone(),
            config.network.timeout,
            descriptors,
            credentials,
        );
        let staging = UploadStaging::new(config.storage.upload_ttl, config.storage.max_file_size);
        Self {
            config,
            manager,
            staging,
        }
    }

    /// Service backed by the descriptor and secrets files named in `config`
    pub fn from_config(config: Config) -> Self {
        let descriptors = Arc::new(FileDescriptorStore::new(config.stores.repositories.clone()));
        let credentials = Arc::new(SecretsFile::new(config.stores.secrets.clone()));
        Self::new(config, descriptors, credentials)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &RepositoryManager {
        &self.manager
    }

    /// Fix the caller's deadline, defaulting to the configured network timeout
    fn caller<'a>(&self, caller: impl Into<Caller<'a>>) -> Caller<'a> {
        let mut caller = caller.into();
        if caller.deadline.is_none() {
            caller.deadline = Some(Instant::now() + self.config.network.timeout);
        }
        caller
    }

    /// Resolve (cloning if needed) without doing anything else
    pub async fn resolve(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
    ) -> Result<Arc<RepositoryClone>> {
        let caller = self.caller(caller);
        self.manager.resolve_until(id, caller.name, caller.deadline).await
    }

    async fn run<T, F>(&self, clone: Arc<RepositoryClone>, caller: &Caller<'_>, f: F) -> Result<T>
    where
        F: FnOnce(GitRepo) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = caller.deadline;
        let max_file_size = self.config.storage.max_file_size;
        tokio::task::spawn_blocking(move || {
            let repo = GitRepo::open(&clone)?
                .with_deadline(deadline)
                .with_max_file_size(max_file_size);
            f(repo)
        })
        .await
        .map_err(|e| Error::Other(format!("Repository task panicked: {}", e)))?
    }

    pub async fn list_branches(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        options: ListOptions,
        remote: bool,
        with_head: bool,
    ) -> Result<Page<BranchInfo>> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, remote, with_head, "list_branches");
        let clone = self.resolve(id, caller).await?;
        self.run(clone, &caller, move |repo| repo.list_branches(options, remote, with_head))
            .await
    }

    pub async fn get_branch(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        name: &str,
    ) -> Result<BranchInfo> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, branch = name, "get_branch");
        if name.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        let clone = self.resolve(id, caller).await?;
        let name = name.to_string();
        self.run(clone, &caller, move |repo| repo.get_branch(&name)).await
    }

    pub async fn list_commits(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        branch: &str,
        file: Option<&str>,
        options: ListOptions,
    ) -> Result<Page<Commit>> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, branch, file, "list_commits");
        if branch.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        let clone = self.resolve(id, caller).await?;
        let branch = branch.to_string();
        let file = file.map(str::to_string);
        self.run(clone, &caller, move |repo| repo.list_commits(&branch, file.as_deref(), options))
            .await
    }

    pub async fn get_commit(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        hash: &str,
    ) -> Result<Commit> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, hash, "get_commit");
        if hash.is_empty() {
            return Err(Error::invalid("commit hash is required"));
        }
        let clone = self.resolve(id, caller).await?;
        let hash = hash.to_string();
        self.run(clone, &caller, move |repo| repo.get_commit(&hash)).await
    }

    pub async fn get_config(&self, id: &RepositoryId, caller: impl Into<Caller<'_>>) -> Result<RepoConfig> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, "get_config");
        let clone = self.resolve(id, caller).await?;
        self.run(clone, &caller, |repo| repo.get_config()).await
    }

    pub async fn update_config(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        update: Option<RepoConfig>,
    ) -> Result<RepoConfig> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, "update_config");
        let update = update.ok_or_else(|| Error::invalid("configuration is required"))?;
        let clone = self.resolve(id, caller).await?;
        let lease = clone.lock_worktree().await;
        self.run(clone, &caller, move |repo| {
            let updated = repo.update_config(Some(&update));
            drop(lease);
            updated
        })
        .await
    }

    pub async fn get_file(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        request: GetFileRequest,
    ) -> Result<FetchedFile> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, path = %request.path, "get_file");
        let clone = self.resolve(id, caller).await?;
        self.run(clone, &caller, move |repo| repo.get_file(&request)).await
    }

    pub async fn list_files(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        dir_path: &str,
        branch: &str,
        with_last_commit: bool,
    ) -> Result<Vec<FileInfo>> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, dir_path, branch, with_last_commit, "list_files");
        let clone = self.resolve(id, caller).await?;
        let dir_path = dir_path.to_string();
        let branch = branch.to_string();
        self.run(clone, &caller, move |repo| repo.list_files(&dir_path, &branch, with_last_commit))
            .await
    }

    pub async fn add_files(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        input: AddFilesInput,
    ) -> Result<Commit> {
        let caller = self.caller(caller);
        debug!(
            repository = %id,
            caller = caller.name,
            branch = %input.branch,
            files = input.files.len(),
            "add_files"
        );
        let clone = self.resolve(id, caller).await?;
        self.staging.sweep(&clone.upload_root()).await?;
        let lease = clone.lock_worktree().await;
        let commit = self.run(clone, &caller, move |repo| repo.add_files(lease, &input)).await?;
        info!(repository = %id, commit = %commit.hash, "Files added");
        Ok(commit)
    }

    pub async fn delete_files(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        input: DeleteFilesInput,
    ) -> Result<Commit> {
        let caller = self.caller(caller);
        debug!(
            repository = %id,
            caller = caller.name,
            branch = %input.branch,
            paths = input.paths.len(),
            "delete_files"
        );
        let clone = self.resolve(id, caller).await?;
        let lease = clone.lock_worktree().await;
        let commit = self.run(clone, &caller, move |repo| repo.delete_files(lease, &input)).await?;
        info!(repository = %id, commit = %commit.hash, "Files deleted");
        Ok(commit)
    }

    /// Stage blobs for a later [`add_files`](Self::add_files) with [`FileSource::Staged`](crate::git::FileSource::Staged)
    pub async fn upload_files(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        blobs: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<StagedUpload>> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, uploads = blobs.len(), "upload_files");
        if blobs.is_empty() {
            return Err(Error::invalid("at least one upload is required"));
        }
        let clone = self.resolve(id, caller).await?;
        let root = clone.upload_root();
        self.staging.sweep(&root).await?;
        self.staging.store_all(&root, blobs).await
    }

    /// Run `f` against a checked-out, cleaned working tree of `branch`
    ///
    /// The lease is held until `f` returns.
    pub async fn with_worktree<T, F>(
        &self,
        id: &RepositoryId,
        caller: impl Into<Caller<'_>>,
        branch: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut WorkTree<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if branch.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        let caller = self.caller(caller);
        let clone = self.resolve(id, caller).await?;
        let lease = clone.lock_worktree().await;
        let branch = branch.to_string();
        self.run(clone, &caller, move |repo| {
            let mut worktree = repo.check_out_branch(lease, &branch, true)?;
            worktree.clean_and_pull()?;
            f(&mut worktree)
        })
        .await
    }

    /// Remove the local clone; the next access clones again
    ///
    /// Works on clones that can no longer be opened, and never clones first.
    pub async fn delete_clone(&self, id: &RepositoryId, caller: impl Into<Caller<'_>>) -> Result<bool> {
        let caller = self.caller(caller);
        debug!(repository = %id, caller = caller.name, "delete_clone");
        self.manager.delete_clone(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::RemoteFixture;
    use crate::git::{FileSource, NewFile};
    use std::time::Duration;

    fn add_input(path: &str, source: FileSource) -> AddFilesInput {
        AddFilesInput {
            branch: "main".into(),
            message: format!("Update {}", path),
            files: vec![NewFile {
                path: path.into(),
                source,
            }],
        }
    }

    #[tokio::test]
    async fn test_add_then_get_file() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let commit = service
            .add_files(&id, "alice", add_input("env/prod.yaml", FileSource::Inline(b"tier: prod".to_vec())))
            .await
            .unwrap();

        let fetched = service
            .get_file(
                &id,
                "alice",
                GetFileRequest {
                    branch: Some("main".into()),
                    path: "env/prod.yaml".into(),
                    with_content: true,
                    with_last_commit: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fetched.info.content.as_deref(), Some(&b"tier: prod"[..]));
        assert_eq!(fetched.info.last_commit.unwrap().hash, commit.hash);

        let commits = service
            .list_commits(&id, "alice", "main", Some("env/prod.yaml"), ListOptions::default())
            .await
            .unwrap();
        assert_eq!(commits.total_items, 1);
        assert_eq!(commits.items[0].hash, commit.hash);
    }

    #[tokio::test]
    async fn test_repeat_add_is_clean() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();
        let input = add_input("same.txt", FileSource::Inline(b"same".to_vec()));

        service.add_files(&id, "alice", input.clone()).await.unwrap();
        let err = service.add_files(&id, "alice", input).await.unwrap_err();
        assert!(matches!(err, Error::WorkTreeClean));
    }

    #[tokio::test]
    async fn test_upload_then_add_staged() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let staged = service
            .upload_files(&id, "alice", vec![("bundle.bin".into(), b"payload".to_vec())])
            .await
            .unwrap();
        assert!(staged[0].path.exists());

        service
            .add_files(&id, "alice", add_input("blobs/bundle.bin", FileSource::Staged("bundle.bin".into())))
            .await
            .unwrap();
        assert!(!staged[0].path.exists());
        assert_eq!(
            fixture.remote_file("main", "blobs/bundle.bin").as_deref(),
            Some(&b"payload"[..])
        );
    }

    #[tokio::test]
    async fn test_uploads_expire() {
        let fixture = RemoteFixture::new();
        let mut config = fixture.config();
        config.storage.upload_ttl = Duration::from_millis(100);
        let service = fixture.service_with(config);
        let id = fixture.id();

        let staged = service
            .upload_files(&id, "alice", vec![("later.bin".into(), b"x".to_vec())])
            .await
            .unwrap();
        tokio::time::sleep(service.config().storage.upload_ttl + Duration::from_millis(300)).await;
        assert!(!staged[0].path.exists());

        let err = service
            .add_files(&id, "alice", add_input("later.bin", FileSource::Staged("later.bin".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_and_oversized() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let err = service.upload_files(&id, "alice", Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = service
            .upload_files(&id, "alice", vec![("huge".into(), vec![0u8; 4096])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExceeded { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_mutations_serialise() {
        let fixture = RemoteFixture::new();
        let service = Arc::new(fixture.service());
        let id = fixture.id();

        let mut handles = Vec::new();
        for i in 0..4 {
            let service = Arc::clone(&service);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service
                    .add_files(
                        &id,
                        "alice",
                        add_input(&format!("n{}.txt", i), FileSource::Inline(format!("{}", i).into_bytes())),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let commits = service
            .list_commits(&id, "alice", "main", None, ListOptions::default())
            .await
            .unwrap();
        assert_eq!(commits.total_items, 5);
        for i in 0..4 {
            assert!(fixture.remote_file("main", &format!("n{}.txt", i)).is_some());
        }
    }

    #[tokio::test]
    async fn test_with_worktree_scoped_sequence() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let commit = service
            .with_worktree(&id, "alice", "main", |worktree| {
                worktree.write_file("a.txt", b"a")?;
                worktree.write_file("b.txt", b"b")?;
                worktree.commit_and_push("Two files")
            })
            .await
            .unwrap();
        assert_eq!(fixture.remote_tip("main").to_string(), commit.hash);
    }

    #[tokio::test]
    async fn test_unknown_repository() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let err = service
            .get_config(&RepositoryId::new("team-z", "none"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepositoryNotFound(_)));
        assert!(err.kind().is_client_error());
    }

    #[tokio::test]
    async fn test_config_and_branches() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let err = service.update_config(&id, "alice", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let config = service
            .update_config(
                &id,
                "alice",
                Some(RepoConfig {
                    user_name: Some("Release Bot".into()),
                    user_email: Some("release@example.com".into()),
                    remote_url: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(config.user_name.as_deref(), Some("Release Bot"));

        let commit = service
            .add_files(&id, "alice", add_input("x.txt", FileSource::Inline(b"x".to_vec())))
            .await
            .unwrap();
        assert_eq!(commit.author.email, "release@example.com");

        let branch = service.get_branch(&id, "alice", "main").await.unwrap();
        assert_eq!(branch.commit_hash, commit.hash);
        let page = service
            .list_branches(&id, "alice", ListOptions::default(), true, true)
            .await
            .unwrap();
        assert_eq!(page.items[0].name, crate::git::HEAD);
    }

    #[tokio::test]
    async fn test_delete_clone_then_reclone() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let clone = service.resolve(&id, "alice").await.unwrap();
        assert!(service.delete_clone(&id, "alice").await.unwrap());
        assert!(!clone.path().exists());
        let again = service.resolve(&id, "alice").await.unwrap();
        assert!(again.freshly_cloned());
    }

    #[tokio::test]
    async fn test_caller_deadline_applies_to_network_calls() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();
        service.resolve(&id, "alice").await.unwrap();

        let late = Caller::new("alice").with_deadline(Instant::now() - Duration::from_secs(1));
        let err = service.get_branch(&id, late, "main").await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        let err = service
            .add_files(&id, late, add_input("late.txt", FileSource::Inline(b"x".to_vec())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert!(fixture.remote_file("main", "late.txt").is_none());

        // Local-only reads still succeed
        assert!(service.get_config(&id, late).await.is_ok());
        let generous = Caller::new("alice").with_timeout(Duration::from_secs(60));
        assert!(service.get_branch(&id, generous, "main").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_corrupt_clone() {
        let fixture = RemoteFixture::new();
        let service = fixture.service();
        let id = fixture.id();

        let clone = service.resolve(&id, "alice").await.unwrap();
        std::fs::remove_dir_all(clone.path().join(".git")).unwrap();
        assert!(matches!(service.get_config(&id, "alice").await, Err(Error::Open { .. })));

        assert!(service.delete_clone(&id, "alice").await.unwrap());
        assert!(!clone.path().exists());
        assert!(service.resolve(&id, "alice").await.unwrap().freshly_cloned());
    }
}
