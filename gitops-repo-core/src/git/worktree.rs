//! Scoped working-tree handle and the mutation pipeline
//!
//! Every mutation runs the same sequence while holding the clone's
//! [`WorkTreeLease`]:
//!
//! 1. check out the branch (forced)
//! 2. discard local changes and fast-forward to the remote tip
//! 3. apply the mutation to the working tree
//! 4. commit everything and push
//!
//! A failed push rolls the local branch back to its pre-commit tip, so the
//! next pipeline starts from the remote state again.

use std::path::{Component, Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{IndexAddOption, Oid, ResetType, Signature, Status, StatusOptions};
use tracing::{debug, info, warn};

use super::clone::WorkTreeLease;
use super::commit::Commit;
use super::repo::{GitRepo, ORIGIN};
use crate::{Error, Result};

/// Email used when neither the credential nor the clone configures one
const FALLBACK_EMAIL_DOMAIN: &str = "gitops-repo.local";

/// Where a [`WorkTree`] is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckedOut,
    Cleaned,
    Mutated,
    Pushed,
}

/// Exclusive handle on a clone's working tree with one branch checked out
pub struct WorkTree<'r> {
    repo: &'r GitRepo,
    branch: String,
    stage: Stage,
    /// Files written by this handle; committed even when `.gitignore` matches them
    written: Vec<PathBuf>,
    _lease: WorkTreeLease,
}

impl std::fmt::Debug for WorkTree<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkTree")
            .field("root", &self.repo.root())
            .field("branch", &self.branch)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Resolve a caller-supplied path inside the working tree
///
/// Absolute paths, `..` and anything under `.git` are rejected.
pub(crate) fn worktree_relative(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::invalid("path is required"));
    }
    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                if relative.as_os_str().is_empty() && part == ".git" {
                    return Err(Error::invalid(format!("path '{}' points into .git", path)));
                }
                relative.push(part);
            }
            Component::CurDir => {}
            _ => return Err(Error::invalid(format!("path '{}' escapes the working tree", path))),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(Error::invalid("path is required"));
    }
    Ok(relative)
}

impl GitRepo {
    /// Check out `branch` under `lease`, fetching it once if it is not known locally
    pub fn check_out_branch(&self, lease: WorkTreeLease, branch: &str, force: bool) -> Result<WorkTree<'_>> {
        if branch.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        self.check_lease(&lease)?;

        let tip = match self.checkout_local(branch, force) {
            Ok(tip) => tip,
            Err(first) => {
                debug!(branch, error = %first, "Branch not checked out locally, fetching");
                self.fetch_branch(branch)?;
                self.checkout_local(branch, force)?
            }
        };
        debug!(branch, commit = %tip, "Checked out branch");

        Ok(WorkTree {
            repo: self,
            branch: branch.to_string(),
            stage: Stage::CheckedOut,
            written: Vec::new(),
            _lease: lease,
        })
    }
}

impl<'r> WorkTree<'r> {
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Working tree root
    pub fn path(&self) -> &Path {
        self.repo.root()
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'r>>> {
        match self.repo.inner().head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_untracked(&self) -> Result<usize> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = self.repo.inner().statuses(Some(&mut options))?;

        let mut removed = 0;
        for entry in statuses.iter() {
            if !entry.status().contains(Status::WT_NEW) {
                continue;
            }
            let Some(path) = entry.path() else { continue };
            let full = self.path().join(path);
            let result = if full.is_dir() {
                std::fs::remove_dir_all(&full)
            } else {
                std::fs::remove_file(&full)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Discard local modifications and untracked files, then fast-forward to the remote tip
    pub fn clean_and_pull(&mut self) -> Result<()> {
        let repo = self.repo.inner();
        if let Some(head) = self.head_commit()? {
            repo.reset(head.as_object(), ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        }
        let removed = self.remove_untracked()?;

        match self.repo.fetch_branch(&self.branch) {
            Ok(()) => {}
            // Local-only branch: nothing to pull
            Err(Error::BranchNotFound(_)) => {
                debug!(branch = %self.branch, "Branch not on remote, skipping pull");
                self.stage = Stage::Cleaned;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, self.branch);
        let target = repo.find_reference(&remote_ref)?.peel_to_commit()?;
        let current = self.head_commit()?.map(|c| c.id());
        if current != Some(target.id()) {
            repo.reset(target.as_object(), ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
            debug!(branch = %self.branch, commit = %target.id(), "Moved branch to remote tip");
        }

        debug!(branch = %self.branch, removed_untracked = removed, "Working tree clean");
        self.stage = Stage::Cleaned;
        Ok(())
    }

    /// Write a file into the working tree, creating parent directories
    pub fn write_file(&mut self, path: &str, content: &[u8]) -> Result<PathBuf> {
        let relative = worktree_relative(path)?;
        let full = self.path().join(&relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, content)?;
        if !self.written.contains(&relative) {
            self.written.push(relative.clone());
        }
        self.stage = Stage::Mutated;
        Ok(relative)
    }

    /// Remove a file or directory from the working tree
    pub fn remove_path(&mut self, path: &str) -> Result<()> {
        let relative = worktree_relative(path)?;
        let full = self.path().join(&relative);
        let metadata = match std::fs::symlink_metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::PathNotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            std::fs::remove_dir_all(&full)?;
        } else {
            std::fs::remove_file(&full)?;
        }
        self.written.retain(|written| !written.starts_with(&relative));
        self.stage = Stage::Mutated;
        Ok(())
    }

    /// Unpack a gzip-compressed tar archive into `dest` (relative to the root)
    pub fn unpack_archive(&mut self, dest: &str, archive: &[u8]) -> Result<usize> {
        let base = if dest.trim_matches('/').is_empty() {
            PathBuf::new()
        } else {
            worktree_relative(dest)?
        };
        let target = self.path().join(&base);
        std::fs::create_dir_all(&target)?;

        let decoder = flate2::read::GzDecoder::new(archive);
        let mut tar = tar::Archive::new(decoder);
        let mut unpacked = 0;
        for entry in tar.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();
            let top = entry_path.components().find_map(|c| match c {
                Component::Normal(part) => Some(part.to_os_string()),
                _ => None,
            });
            if target == self.path() && top.as_deref() == Some(std::ffi::OsStr::new(".git")) {
                return Err(Error::invalid("archive must not write into .git"));
            }
            let is_dir = entry.header().entry_type().is_dir();
            if !entry.unpack_in(&target)? {
                return Err(Error::invalid(format!(
                    "archive entry '{}' escapes the destination",
                    entry_path.display()
                )));
            }
            if !is_dir {
                let relative: PathBuf = entry_path
                    .components()
                    .filter(|c| matches!(c, Component::Normal(_)))
                    .collect();
                let relative = base.join(relative);
                if !self.written.contains(&relative) {
                    self.written.push(relative);
                }
            }
            unpacked += 1;
        }
        debug!(dest, entries = unpacked, "Unpacked archive");
        self.stage = Stage::Mutated;
        Ok(unpacked)
    }

    fn signatures(&self) -> Result<(Signature<'static>, Signature<'static>)> {
        let repo = self.repo.inner();
        let auth = self.repo.auth();
        let committer = match repo.signature() {
            Ok(signature) => signature.to_owned(),
            Err(_) => Signature::now(
                &auth.username,
                &format!("{}@{}", auth.username, FALLBACK_EMAIL_DOMAIN),
            )?,
        };
        let author = match &auth.commit_author {
            Some(author) => Signature::now(&author.name, &author.email)?,
            None => committer.clone(),
        };
        Ok((author, committer))
    }

    fn rollback(&self, previous: Option<Oid>) {
        let repo = self.repo.inner();
        let refname = format!("refs/heads/{}", self.branch);
        let result = match previous {
            Some(oid) => repo
                .reference(&refname, oid, true, "rollback unpushed commit")
                .map(drop),
            None => repo.find_reference(&refname).and_then(|mut r| r.delete()),
        };
        if let Err(e) = result {
            warn!(branch = %self.branch, error = %e, "Failed to roll back unpushed commit");
        }
    }

    /// Stage everything, commit on the branch and push it
    ///
    /// Fails with [`Error::WorkTreeClean`] when nothing changed. Any push
    /// failure leaves the local branch at its previous tip.
    pub fn commit_and_push(&mut self, message: &str) -> Result<Commit> {
        if message.trim().is_empty() {
            return Err(Error::invalid("commit message is required"));
        }
        let repo = self.repo.inner();

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // Ignore rules do not apply to files the caller asked for explicitly
        for path in &self.written {
            if std::fs::symlink_metadata(self.path().join(path)).is_ok() {
                index.add_path(path)?;
            }
        }
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;

        let parent = self.head_commit()?;
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree.id()) {
            return Err(Error::WorkTreeClean);
        }

        let (author, committer) = self.signatures()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &author, &committer, message, &tree, &parents)?;
        let previous = parent.as_ref().map(|p| p.id());
        info!(branch = %self.branch, commit = %oid, "Created commit");

        if let Err(e) = self.push() {
            self.rollback(previous);
            return Err(e);
        }

        let tracking = format!("refs/remotes/{}/{}", ORIGIN, self.branch);
        repo.reference(&tracking, oid, true, "update after push")?;
        self.stage = Stage::Pushed;

        Ok(Commit::from_git(&repo.find_commit(oid)?))
    }

    fn push(&self) -> Result<()> {
        let transport = self.repo.transport("push");
        transport.check_deadline()?;

        let mut remote = self.repo.inner().find_remote(ORIGIN)?;
        let refspec = format!("refs/heads/{b}:refs/heads/{b}", b = self.branch);
        remote
            .push(&[refspec.as_str()], Some(&mut transport.push_options()))
            .map_err(|e| transport.map_error(e))?;

        let rejected = transport.rejected();
        if let Some((refname, status)) = rejected.first() {
            return Err(Error::Conflict(format!("remote rejected {}: {}", refname, status)));
        }
        info!(branch = %self.branch, "Pushed branch");
        Ok(())
    }
}

/// Where the bytes of a new file come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Content supplied inline
    Inline(Vec<u8>),
    /// Name of a previously staged upload
    Staged(String),
    /// Gzip tar archive unpacked at the file's path
    Archive(Vec<u8>),
}

/// One file to add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub path: String,
    pub source: FileSource,
}

/// Input to [`GitRepo::add_files`]
#[derive(Debug, Clone, Default)]
pub struct AddFilesInput {
    pub branch: String,
    pub message: String,
    pub files: Vec<NewFile>,
}

/// Input to [`GitRepo::delete_files`]
#[derive(Debug, Clone, Default)]
pub struct DeleteFilesInput {
    pub branch: String,
    pub message: String,
    pub paths: Vec<String>,
}

fn check_common(branch: &str, message: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(Error::invalid("branch name is required"));
    }
    if message.trim().is_empty() {
        return Err(Error::invalid("commit message is required"));
    }
    Ok(())
}

fn check_staged_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::invalid(format!("invalid upload name '{}'", name)));
    }
    Ok(())
}

impl GitRepo {
    fn check_size(&self, name: &str, size: u64) -> Result<()> {
        if size > self.max_file_size() {
            return Err(Error::ResourceExceeded {
                name: name.to_string(),
                size,
                limit: self.max_file_size(),
            });
        }
        Ok(())
    }

    /// Add or overwrite files on a branch, then commit and push
    ///
    /// An archive must be the only file in the request. Staged uploads are
    /// deleted once the push succeeds.
    pub fn add_files(&self, lease: WorkTreeLease, input: &AddFilesInput) -> Result<Commit> {
        check_common(&input.branch, &input.message)?;
        if input.files.is_empty() {
            return Err(Error::invalid("at least one file is required"));
        }
        let has_archive = input.files.iter().any(|f| matches!(f.source, FileSource::Archive(_)));
        if has_archive && input.files.len() > 1 {
            return Err(Error::invalid("an archive must be the only file in the request"));
        }

        let upload_root = self.upload_root();
        let mut staged = Vec::new();
        for file in &input.files {
            match &file.source {
                FileSource::Archive(_) => {
                    if !file.path.trim_matches('/').is_empty() {
                        worktree_relative(&file.path)?;
                    }
                }
                FileSource::Inline(content) => {
                    worktree_relative(&file.path)?;
                    self.check_size(&file.path, content.len() as u64)?;
                }
                FileSource::Staged(name) => {
                    worktree_relative(&file.path)?;
                    check_staged_name(name)?;
                    let staged_path = upload_root.join(name);
                    let size = match std::fs::metadata(&staged_path) {
                        Ok(metadata) => metadata.len(),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            return Err(Error::PathNotFound(format!("upload '{}'", name)))
                        }
                        Err(e) => return Err(e.into()),
                    };
                    self.check_size(name, size)?;
                    staged.push(staged_path);
                }
            }
        }

        let mut worktree = self.check_out_branch(lease, &input.branch, true)?;
        worktree.clean_and_pull()?;
        for file in &input.files {
            match &file.source {
                FileSource::Inline(content) => {
                    worktree.write_file(&file.path, content)?;
                }
                FileSource::Staged(name) => {
                    let content = std::fs::read(upload_root.join(name))?;
                    worktree.write_file(&file.path, &content)?;
                }
                FileSource::Archive(archive) => {
                    worktree.unpack_archive(&file.path, archive)?;
                }
            }
        }
        let commit = worktree.commit_and_push(&input.message)?;

        for path in staged {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove consumed upload");
                }
            }
        }
        Ok(commit)
    }

    /// Delete files or directories from a branch, then commit and push
    pub fn delete_files(&self, lease: WorkTreeLease, input: &DeleteFilesInput) -> Result<Commit> {
        check_common(&input.branch, &input.message)?;
        if input.paths.is_empty() {
            return Err(Error::invalid("at least one path is required"));
        }
        for path in &input.paths {
            worktree_relative(path)?;
        }

        let mut worktree = self.check_out_branch(lease, &input.branch, true)?;
        worktree.clean_and_pull()?;
        for path in &input.paths {
            worktree.remove_path(path)?;
        }
        worktree.commit_and_push(&input.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::clone::RepositoryClone;
    use crate::git::testutil::RemoteFixture;
    use crate::git::url::RepoUrl;
    use crate::git::AuthContext;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    async fn lease_for(repo: &GitRepo) -> (RepositoryClone, WorkTreeLease) {
        let clone = RepositoryClone::new(
            crate::descriptor::RepositoryId::new("t", "r"),
            repo.root().to_path_buf(),
            RepoUrl::parse("/unused").unwrap(),
            AuthContext::anonymous("tester"),
        );
        let lease = clone.lock_worktree().await;
        (clone, lease)
    }

    fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_worktree_relative() {
        assert_eq!(worktree_relative("/a/b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert!(worktree_relative("../x").is_err());
        assert!(worktree_relative("a/../../x").is_err());
        assert!(worktree_relative(".git/config").is_err());
        assert!(worktree_relative("").is_err());
        assert!(worktree_relative("/").is_err());
    }

    #[tokio::test]
    async fn test_add_then_read_back() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        let (_clone, lease) = lease_for(&repo).await;

        let commit = repo
            .add_files(
                lease,
                &AddFilesInput {
                    branch: "main".into(),
                    message: "Add config".into(),
                    files: vec![NewFile {
                        path: "deploy/app.yaml".into(),
                        source: FileSource::Inline(b"replicas: 2\n".to_vec()),
                    }],
                },
            )
            .unwrap();

        assert_eq!(commit.summary(), "Add config");
        assert_eq!(fixture.remote_tip("main").to_string(), commit.hash);
        assert_eq!(
            fixture.remote_file("main", "deploy/app.yaml").as_deref(),
            Some(&b"replicas: 2\n"[..])
        );
    }

    #[tokio::test]
    async fn test_clean_tree_is_reported() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        let (clone, lease) = lease_for(&repo).await;

        let mut worktree = repo.check_out_branch(lease, "main", true).unwrap();
        std::fs::write(worktree.path().join("stray.txt"), "junk").unwrap();
        std::fs::write(worktree.path().join("README.md"), "edited").unwrap();
        worktree.clean_and_pull().unwrap();
        assert_eq!(worktree.stage(), Stage::Cleaned);
        assert!(!worktree.path().join("stray.txt").exists());

        let err = worktree.commit_and_push("nothing").unwrap_err();
        assert!(matches!(err, Error::WorkTreeClean));
        drop(worktree);
        assert!(clone.try_lock_worktree().is_some());
    }

    #[tokio::test]
    async fn test_pull_picks_up_remote_changes() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        let remote_tip = fixture.push(&[("new.txt", Some("from elsewhere"))], "Remote change");
        let (_clone, lease) = lease_for(&repo).await;

        let mut worktree = repo.check_out_branch(lease, "main", true).unwrap();
        worktree.clean_and_pull().unwrap();
        assert!(worktree.path().join("new.txt").exists());
        assert_eq!(repo.branch_tip("main").unwrap(), remote_tip);
    }

    #[tokio::test]
    async fn test_checkout_fetches_unknown_branch() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        fixture.push_branch("release", &[("rel.txt", Some("r"))], "Release");
        let (clone, lease) = lease_for(&repo).await;

        let worktree = repo.check_out_branch(lease, "release", true).unwrap();
        assert!(worktree.path().join("rel.txt").exists());
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("release"));
        drop(worktree);

        let lease = clone.lock_worktree().await;
        let err = repo.check_out_branch(lease, "ghost", true).unwrap_err();
        assert!(matches!(err, Error::BranchNotFound(_)));
    }

    #[tokio::test]
    async fn test_ignored_paths_are_committed_when_written() {
        let fixture = RemoteFixture::new();
        fixture.push(&[(".gitignore", Some("*.log\nbuild/\n"))], "Ignore logs");
        let repo = fixture.local_repo();
        let (clone, lease) = lease_for(&repo).await;

        let mut worktree = repo.check_out_branch(lease, "main", true).unwrap();
        worktree.clean_and_pull().unwrap();
        // Ignored junk left in the tree stays out of the commit
        std::fs::write(worktree.path().join("stale.log"), "old").unwrap();
        worktree.write_file("debug.log", b"kept").unwrap();
        worktree.commit_and_push("Add log").unwrap();
        drop(worktree);
        assert_eq!(fixture.remote_file("main", "debug.log").as_deref(), Some(&b"kept"[..]));
        assert!(fixture.remote_file("main", "stale.log").is_none());

        let lease = clone.lock_worktree().await;
        repo.add_files(
            lease,
            &AddFilesInput {
                branch: "main".into(),
                message: "Add build output".into(),
                files: vec![NewFile {
                    path: "/".into(),
                    source: FileSource::Archive(tar_gz(&[("build/out.txt", "o")])),
                }],
            },
        )
        .unwrap();
        assert_eq!(fixture.remote_file("main", "build/out.txt").as_deref(), Some(&b"o"[..]));
    }

    #[tokio::test]
    async fn test_delete_files() {
        let fixture = RemoteFixture::new();
        fixture.push(&[("a.txt", Some("a")), ("dir/b.txt", Some("b"))], "seed");
        let repo = fixture.local_repo();
        let (clone, lease) = lease_for(&repo).await;

        repo.delete_files(
            lease,
            &DeleteFilesInput {
                branch: "main".into(),
                message: "Remove".into(),
                paths: vec!["a.txt".into(), "dir".into()],
            },
        )
        .unwrap();
        assert!(fixture.remote_file("main", "a.txt").is_none());
        assert!(fixture.remote_file("main", "dir/b.txt").is_none());

        let lease = clone.lock_worktree().await;
        let err = repo
            .delete_files(
                lease,
                &DeleteFilesInput {
                    branch: "main".into(),
                    message: "Remove again".into(),
                    paths: vec!["a.txt".into()],
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }

    #[tokio::test]
    async fn test_archive_upload() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        let (clone, lease) = lease_for(&repo).await;

        let archive = tar_gz(&[("chart/values.yaml", "a: 1\n"), ("chart/Chart.yaml", "name: c\n")]);
        repo.add_files(
            lease,
            &AddFilesInput {
                branch: "main".into(),
                message: "Add chart".into(),
                files: vec![NewFile {
                    path: "helm/".into(),
                    source: FileSource::Archive(archive.clone()),
                }],
            },
        )
        .unwrap();
        assert_eq!(
            fixture.remote_file("main", "helm/chart/values.yaml").as_deref(),
            Some(&b"a: 1\n"[..])
        );

        let lease = clone.lock_worktree().await;
        let err = repo
            .add_files(
                lease,
                &AddFilesInput {
                    branch: "main".into(),
                    message: "Mixed".into(),
                    files: vec![
                        NewFile {
                            path: "helm/".into(),
                            source: FileSource::Archive(archive),
                        },
                        NewFile {
                            path: "x.txt".into(),
                            source: FileSource::Inline(b"x".to_vec()),
                        },
                    ],
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_size_limit_enforced() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo().with_max_file_size(4);
        let (_clone, lease) = lease_for(&repo).await;

        let err = repo
            .add_files(
                lease,
                &AddFilesInput {
                    branch: "main".into(),
                    message: "Too big".into(),
                    files: vec![NewFile {
                        path: "big.txt".into(),
                        source: FileSource::Inline(b"0123456789".to_vec()),
                    }],
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExceeded { size: 10, limit: 4, .. }));
    }

    #[tokio::test]
    async fn test_rejected_push_rolls_back() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        let before = repo.branch_tip("main").unwrap();
        let (_clone, lease) = lease_for(&repo).await;

        let mut worktree = repo.check_out_branch(lease, "main", true).unwrap();
        worktree.clean_and_pull().unwrap();
        // Someone else pushes after our pull
        fixture.push(&[("race.txt", Some("them"))], "Concurrent change");

        worktree.write_file("ours.txt", b"us").unwrap();
        let err = worktree.commit_and_push("Ours").unwrap_err();
        assert!(
            matches!(err.kind(), crate::ErrorKind::Conflict),
            "unexpected error: {:?}",
            err
        );
        drop(worktree);
        assert_eq!(repo.branch_tip("main").unwrap(), before);
    }
}
