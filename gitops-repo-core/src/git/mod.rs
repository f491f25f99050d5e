//! Git operations for managed clones
//!
//! This module provides clone management, the repository facade and the
//! commit/push pipeline.

mod auth;
mod branch;
mod clone;
mod commit;
mod files;
mod history;
mod repo;
mod url;
mod worktree;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{AuthContext, CommitAuthor};
pub use branch::{BranchInfo, HEAD};
pub use clone::{RepositoryClone, RepositoryManager, WorkTreeLease};
pub use commit::{Commit, Signature};
pub use files::{BlobStream, FetchedFile, FileInfo, GetFileRequest};
pub use history::{last_commits_for_paths, CommitIndex};
pub use repo::{GitRepo, RepoConfig, ORIGIN};
pub use url::{clone_path, upload_root, RepoUrl};
pub use worktree::{AddFilesInput, DeleteFilesInput, FileSource, NewFile, Stage, WorkTree};
