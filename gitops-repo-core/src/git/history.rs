//! Last-commit lookup for many paths in one history walk
//!
//! Walks history newest-first from a start commit, carrying the set of paths
//! whose content is still unchanged. A path is attributed to the first commit
//! (in traversal order) where its fingerprint differs from every parent.
//! Paths that are unchanged relative to some parent follow that parent.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use git2::{Oid, Repository};
use tracing::{debug, trace};

use super::commit::entry_id;
use crate::Result;

/// Entries kept before the index is reset
const MAX_INDEXED_COMMITS: usize = 200_000;

#[derive(Debug, Clone)]
struct IndexedCommit {
    time: i64,
    tree: Oid,
    parents: Vec<Oid>,
}

/// Cached commit metadata (time, tree, parents)
///
/// Commits are immutable, so entries never go stale and the index can be
/// shared by every walk over the same clone.
#[derive(Debug, Default)]
pub struct CommitIndex {
    commits: HashMap<Oid, IndexedCommit>,
    commit_graph_checked: bool,
}

impl CommitIndex {
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn clear(&mut self) {
        self.commits.clear();
        self.commit_graph_checked = false;
    }

    fn get(&mut self, repo: &Repository, oid: Oid) -> Result<IndexedCommit> {
        if let Some(entry) = self.commits.get(&oid) {
            return Ok(entry.clone());
        }
        if self.commits.len() >= MAX_INDEXED_COMMITS {
            debug!(entries = self.commits.len(), "Commit index full, resetting");
            self.commits.clear();
        }
        let commit = repo.find_commit(oid)?;
        let entry = IndexedCommit {
            time: commit.time().seconds(),
            tree: commit.tree_id(),
            parents: commit.parent_ids().collect(),
        };
        self.commits.insert(oid, entry.clone());
        Ok(entry)
    }

    fn note_commit_graph(&mut self, repo: &Repository) {
        if self.commit_graph_checked {
            return;
        }
        self.commit_graph_checked = true;
        let info = repo.path().join("objects").join("info");
        let present = info.join("commit-graph").exists() || info.join("commit-graphs").is_dir();
        debug!(commit_graph = present, "Commit graph availability");
    }
}

/// Content fingerprint of `path` in a tree; `None` when absent
fn fingerprint(repo: &Repository, tree: Oid, path: &str) -> Result<Option<Oid>> {
    if path.is_empty() {
        return Ok(Some(tree));
    }
    entry_id(&repo.find_tree(tree)?, path)
}

fn join_path(root: &str, name: &str) -> String {
    let root = root.trim_matches('/');
    let name = name.trim_matches('/');
    match (root.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{}/{}", root, name),
    }
}

/// One frontier entry: a commit plus the paths still being traced through it
struct Pending {
    time: i64,
    oid: Oid,
    /// Indices into the path list
    paths: Vec<usize>,
    /// Fingerprint of each traced path at this commit
    hashes: Vec<Oid>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| self.oid.cmp(&other.oid))
    }
}

/// Find, for each path under `tree_root`, the most recent commit reachable
/// from `start` that changed it
///
/// `paths` are relative to `tree_root`; the empty path stands for
/// `tree_root` itself. Paths absent at `start` get no entry.
pub fn last_commits_for_paths(
    repo: &Repository,
    index: &mut CommitIndex,
    start: Oid,
    tree_root: &str,
    paths: &[String],
) -> Result<HashMap<String, Oid>> {
    index.note_commit_graph(repo);

    let full_paths: Vec<String> = paths.iter().map(|p| join_path(tree_root, p)).collect();
    let mut results: Vec<Option<Oid>> = vec![None; paths.len()];

    let head = index.get(repo, start)?;
    let mut seed = Pending {
        time: head.time,
        oid: start,
        paths: Vec::new(),
        hashes: Vec::new(),
    };
    for (i, path) in full_paths.iter().enumerate() {
        if let Some(hash) = fingerprint(repo, head.tree, path)? {
            seed.paths.push(i);
            seed.hashes.push(hash);
        }
    }

    let mut unresolved = seed.paths.len();
    let mut heap = BinaryHeap::new();
    if unresolved > 0 {
        heap.push(seed);
    }
    let mut visited = 0usize;

    while let Some(current) = heap.pop() {
        if unresolved == 0 {
            break;
        }
        visited += 1;

        let entry = index.get(repo, current.oid)?;
        let mut parent_hashes: Vec<(Oid, i64, Vec<Option<Oid>>)> = Vec::with_capacity(entry.parents.len());
        for parent in &entry.parents {
            let parent_entry = index.get(repo, *parent)?;
            let hashes = current
                .paths
                .iter()
                .map(|&i| fingerprint(repo, parent_entry.tree, &full_paths[i]))
                .collect::<Result<Vec<_>>>()?;
            parent_hashes.push((*parent, parent_entry.time, hashes));
        }

        // Positions within `current.paths` that some parent shares unchanged
        let mut remaining = Vec::new();
        for (pos, &path) in current.paths.iter().enumerate() {
            if results[path].is_some() {
                continue;
            }
            let unchanged = parent_hashes
                .iter()
                .any(|(_, _, hashes)| hashes[pos] == Some(current.hashes[pos]));
            if unchanged {
                remaining.push(pos);
            } else {
                trace!(path = %full_paths[path], commit = %current.oid, "Resolved last commit");
                results[path] = Some(current.oid);
                unresolved -= 1;
            }
        }

        for (parent, time, hashes) in &parent_hashes {
            if remaining.is_empty() {
                break;
            }
            let (carry, rest): (Vec<usize>, Vec<usize>) = std::mem::take(&mut remaining)
                .into_iter()
                .partition(|&pos| hashes[pos] == Some(current.hashes[pos]));
            remaining = rest;

            // Each path follows exactly one parent, so no path is queued twice
            if !carry.is_empty() {
                heap.push(Pending {
                    time: *time,
                    oid: *parent,
                    paths: carry.iter().map(|&pos| current.paths[pos]).collect(),
                    hashes: carry.iter().map(|&pos| current.hashes[pos]).collect(),
                });
            }
        }
    }

    debug!(
        paths = paths.len(),
        resolved = paths.len() - results.iter().filter(|r| r.is_none()).count(),
        visited,
        indexed = index.len(),
        "Last-commit walk finished"
    );

    Ok(paths
        .iter()
        .zip(results)
        .filter_map(|(path, result)| result.map(|oid| (path.clone(), oid)))
        .collect())
}
