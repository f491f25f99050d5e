//! Upload staging area
//!
//! Uploaded blobs are written next to the clone (see
//! [`upload_root`](crate::git::upload_root)) and consumed later by an add
//! operation. Each staged file is removed after the configured TTL whether or
//! not it was consumed. Uploading the same name again restarts its TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Error, Result};

/// A blob accepted into the staging area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedUpload {
    /// Name to reference in a later add operation
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// When the file will be removed
    #[serde(with = "humantime_serde")]
    pub expires_at: SystemTime,
}

/// Writes uploads and schedules their removal
#[derive(Debug, Clone)]
pub struct UploadStaging {
    ttl: Duration,
    max_file_size: u64,
    /// Latest write per staged path; a removal task only fires for its own write
    generations: Arc<Mutex<HashMap<PathBuf, u64>>>,
}

impl UploadStaging {
    pub fn new(ttl: Duration, max_file_size: u64) -> Self {
        Self {
            ttl,
            max_file_size,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn validate(&self, name: &str, size: u64) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::invalid(format!("invalid upload name '{}'", name)));
        }
        if size > self.max_file_size {
            return Err(Error::ResourceExceeded {
                name: name.to_string(),
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Stage every blob under `root`; nothing is written unless all are valid
    ///
    /// Must be called from within a Tokio runtime: removal is scheduled as a
    /// background task.
    pub async fn store_all(&self, root: &Path, blobs: Vec<(String, Vec<u8>)>) -> Result<Vec<StagedUpload>> {
        if blobs.is_empty() {
            return Err(Error::invalid("at least one upload is required"));
        }
        for (name, data) in &blobs {
            self.validate(name, data.len() as u64)?;
        }

        tokio::fs::create_dir_all(root).await?;
        let mut staged = Vec::with_capacity(blobs.len());
        for (name, data) in blobs {
            let path = root.join(&name);
            let generation = {
                let mut generations = self.generations.lock().await;
                let generation = generations.get(&path).map_or(0, |g| g + 1);
                generations.insert(path.clone(), generation);
                tokio::fs::write(&path, &data).await?;
                generation
            };
            debug!(path = %path.display(), size = data.len(), generation, "Staged upload");
            self.schedule_removal(path.clone(), generation);
            staged.push(StagedUpload {
                name,
                path,
                size: data.len() as u64,
                expires_at: SystemTime::now() + self.ttl,
            });
        }
        Ok(staged)
    }

    /// Remove files under `root` older than the TTL
    ///
    /// Catches uploads whose removal task died with a previous process.
    pub async fn sweep(&self, root: &Path) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= self.ttl {
                remove_staged(&entry.path()).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(root = %root.display(), removed, "Swept expired uploads");
        }
        Ok(removed)
    }

    fn schedule_removal(&self, path: PathBuf, generation: u64) {
        let ttl = self.ttl;
        let generations = Arc::clone(&self.generations);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut generations = generations.lock().await;
            if generations.get(&path) != Some(&generation) {
                debug!(path = %path.display(), generation, "Upload was replaced, keeping it");
                return;
            }
            generations.remove(&path);
            remove_staged(&path).await;
        });
    }
}

/// Remove a staged file; a file that is already gone is not an error
pub(crate) async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Expired staged upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged upload"),
    }
}
