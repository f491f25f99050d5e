//! File and directory reads at a commit or branch tip

use std::io::{Cursor, Read};
use std::path::Path;

use git2::{ErrorCode, ObjectType, Oid, Tree, TreeEntry};
use serde::Serialize;
use tracing::debug;

use super::commit::Commit;
use super::history::last_commits_for_paths;
use super::repo::GitRepo;
use crate::{Error, Result};

const SYMLINK_MODE: i32 = 0o120000;

/// Metadata (and optionally content) of one tree entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Base name; for a listing's directory entry, the directory path itself
    pub name: String,
    /// Path from the repository root
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_binary: bool,
    pub is_symlink: bool,
    /// Inline content, only when requested and within the size limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<Commit>,
}

/// Owned reader over a blob's content
#[derive(Debug)]
pub struct BlobStream {
    inner: Cursor<Vec<u8>>,
}

impl BlobStream {
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// A file read from the repository
#[derive(Debug)]
pub struct FetchedFile {
    pub info: FileInfo,
    /// Present when content was requested, regardless of size
    pub stream: Option<BlobStream>,
}

/// What to read with [`GitRepo::get_file`]
#[derive(Debug, Clone, Default)]
pub struct GetFileRequest {
    /// Commit to read at; takes precedence over `branch`
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub path: String,
    pub with_content: bool,
    pub with_last_commit: bool,
}

/// Normalise a repository path: strip surrounding slashes, reject `..` and empty segments
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    for component in trimmed.split('/') {
        if component == ".." || component == "." {
            return Err(Error::invalid(format!("path '{}' must not contain '.' or '..'", path)));
        }
        if component.is_empty() && !trimmed.is_empty() {
            return Err(Error::invalid(format!("path '{}' contains an empty segment", path)));
        }
    }
    Ok(trimmed.to_string())
}

fn base_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

impl GitRepo {
    fn resolve_revision(&self, commit: Option<&str>, branch: Option<&str>) -> Result<Oid> {
        match (commit.filter(|c| !c.is_empty()), branch.filter(|b| !b.is_empty())) {
            (Some(commit), _) => self
                .inner()
                .revparse_single(commit)
                .and_then(|o| o.peel_to_commit())
                .map(|c| c.id())
                .map_err(|_| Error::CommitNotFound(commit.to_string())),
            (None, Some(branch)) => self.branch_tip(branch),
            (None, None) => Err(Error::invalid("either a commit or a branch is required")),
        }
    }

    fn entry_info(&self, entry: &TreeEntry<'_>, path: String) -> Result<FileInfo> {
        let is_symlink = entry.filemode() == SYMLINK_MODE;
        let (is_dir, size, is_binary) = match entry.kind() {
            Some(ObjectType::Tree) => (true, 0, false),
            Some(ObjectType::Blob) => {
                let blob = self.inner().find_blob(entry.id())?;
                (false, blob.size() as u64, blob.is_binary())
            }
            // Submodule links and anything else
            _ => (false, 0, false),
        };
        Ok(FileInfo {
            name: entry.name().map(str::to_string).unwrap_or_else(|| base_name(&path)),
            path,
            size,
            is_dir,
            is_binary,
            is_symlink,
            content: None,
            last_commit: None,
        })
    }

    fn last_commits(&self, start: Oid, root: &str, paths: &[String]) -> Result<Vec<Option<Commit>>> {
        let found =
            self.with_commit_index(|index| last_commits_for_paths(self.inner(), index, start, root, paths))?;
        paths
            .iter()
            .map(|path| match found.get(path) {
                Some(oid) => Ok(Some(Commit::from_git(&self.inner().find_commit(*oid)?))),
                None => Ok(None),
            })
            .collect()
    }

    /// Read one file at a commit or branch tip
    ///
    /// Directories are rejected. Content is inlined only up to the configured
    /// maximum; the stream carries it whenever content was requested.
    pub fn get_file(&self, request: &GetFileRequest) -> Result<FetchedFile> {
        let path = normalize_path(&request.path)?;
        if path.is_empty() {
            return Err(Error::invalid("file path is required"));
        }
        let start = self.resolve_revision(request.commit.as_deref(), request.branch.as_deref())?;
        let tree = self.inner().find_commit(start)?.tree()?;
        let entry = match tree.get_path(Path::new(&path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Err(Error::PathNotFound(path)),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() == Some(ObjectType::Tree) {
            return Err(Error::invalid(format!("'{}' is a directory", path)));
        }

        let mut info = self.entry_info(&entry, path.clone())?;
        let mut stream = None;
        if request.with_content {
            let blob = self.inner().find_blob(entry.id())?;
            let content = blob.content().to_vec();
            if info.size <= self.max_file_size() {
                info.content = Some(content.clone());
            } else {
                debug!(path = %path, size = info.size, "File exceeds inline limit, streaming only");
            }
            stream = Some(BlobStream {
                inner: Cursor::new(content),
            });
        }
        if request.with_last_commit {
            info.last_commit = self.last_commits(start, "", &[path])?.pop().flatten();
        }

        Ok(FetchedFile { info, stream })
    }

    /// List a directory at a branch tip
    ///
    /// `dir_path` must end in `/` (`/` alone is the root). The first entry is
    /// the directory itself; children follow with directories first, each
    /// group sorted by name.
    pub fn list_files(&self, dir_path: &str, branch: &str, with_last_commit: bool) -> Result<Vec<FileInfo>> {
        if !dir_path.ends_with('/') {
            return Err(Error::invalid(format!("directory path '{}' must end with '/'", dir_path)));
        }
        let dir = normalize_path(dir_path)?;
        let start = self.branch_tip(branch)?;
        let root_tree = self.inner().find_commit(start)?.tree()?;

        let tree: Tree<'_> = if dir.is_empty() {
            root_tree
        } else {
            let entry = match root_tree.get_path(Path::new(&dir)) {
                Ok(entry) => entry,
                Err(e) if e.code() == ErrorCode::NotFound => return Err(Error::PathNotFound(dir)),
                Err(e) => return Err(e.into()),
            };
            if entry.kind() != Some(ObjectType::Tree) {
                return Err(Error::invalid(format!("'{}' is not a directory", dir)));
            }
            self.inner().find_tree(entry.id())?
        };

        let mut files = vec![FileInfo {
            name: if dir.is_empty() { "/".to_string() } else { format!("{}/", dir) },
            path: dir.clone(),
            size: 0,
            is_dir: true,
            is_binary: false,
            is_symlink: false,
            content: None,
            last_commit: None,
        }];

        let mut children = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let name = String::from_utf8_lossy(entry.name_bytes()).into_owned();
            let path = if dir.is_empty() { name } else { format!("{}/{}", dir, name) };
            children.push(self.entry_info(&entry, path)?);
        }
        children.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        files.extend(children);

        if with_last_commit {
            let names: Vec<String> = std::iter::once(String::new())
                .chain(files[1..].iter().map(|f| f.name.clone()))
                .collect();
            let commits = self.last_commits(start, &dir, &names)?;
            for (file, commit) in files.iter_mut().zip(commits) {
                file.last_commit = commit;
            }
        }

        Ok(files)
    }
}
