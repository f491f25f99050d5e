//! Commit records and commit listing

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{ErrorCode, Oid, Sort, Tree};
use serde::Serialize;

use super::repo::GitRepo;
use crate::pagination::{ListOptions, Page};
use crate::{Error, Result};

/// Author or committer of a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<Utc>,
}

impl Signature {
    fn from_git(sig: &git2::Signature<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(sig.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(sig.email_bytes()).into_owned(),
            when: DateTime::from_timestamp(sig.when().seconds(), 0).unwrap_or_default(),
        }
    }
}

/// Immutable snapshot of a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub hash: String,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    pub tree_hash: String,
    pub parent_hashes: Vec<String>,
}

impl Commit {
    pub fn from_git(commit: &git2::Commit<'_>) -> Self {
        Self {
            hash: commit.id().to_string(),
            author: Signature::from_git(&commit.author()),
            committer: Signature::from_git(&commit.committer()),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            tree_hash: commit.tree_id().to_string(),
            parent_hashes: commit.parent_ids().map(|id| id.to_string()).collect(),
        }
    }

    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// Entry id of `path` in `tree`, `None` when the path is absent
pub(crate) fn entry_id(tree: &Tree<'_>, path: &str) -> Result<Option<Oid>> {
    match tree.get_path(Path::new(path)) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl GitRepo {
    /// Look up a commit by full or abbreviated hash (or any revspec)
    pub fn get_commit(&self, hash: &str) -> Result<Commit> {
        if hash.trim().is_empty() {
            return Err(Error::invalid("commit hash is required"));
        }
        let commit = self
            .inner()
            .revparse_single(hash)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| Error::CommitNotFound(hash.to_string()))?;
        Ok(Commit::from_git(&commit))
    }

    /// Whether `commit` changed `path` relative to all of its parents
    ///
    /// A root commit touches every path it contains. A merge touches a path
    /// only if the result differs from every parent.
    fn touches(&self, commit: &git2::Commit<'_>, path: &str) -> Result<bool> {
        let current = entry_id(&commit.tree()?, path)?;
        if commit.parent_count() == 0 {
            return Ok(current.is_some());
        }
        for parent in commit.parents() {
            if entry_id(&parent.tree()?, path)? == current {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Commits reachable from `branch`, newest first, optionally limited to
    /// those touching `file`
    pub fn list_commits(&self, branch: &str, file: Option<&str>, options: ListOptions) -> Result<Page<Commit>> {
        let tip = self.branch_tip(branch)?;
        let file = file
            .map(|f| f.trim_matches('/'))
            .filter(|f| !f.is_empty());

        let mut revwalk = self.inner().revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(tip)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let commit = self.inner().find_commit(oid?)?;
            if let Some(path) = file {
                if !self.touches(&commit, path)? {
                    continue;
                }
            }
            commits.push(Commit::from_git(&commit));
        }

        Ok(Page::from_vec(commits, options))
    }
}
