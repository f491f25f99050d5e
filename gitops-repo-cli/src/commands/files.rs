//! File commands: read, list, add, remove and upload

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use gitops_repo_core::{
    AddFilesInput, DeleteFilesInput, FileSource, GetFileRequest, NewFile, RepositoryService,
};
use serde_json::{json, Value};

use super::{print_json, Target};

/// Split `DEST=SOURCE`
fn split_mapping(mapping: &str) -> anyhow::Result<(String, String)> {
    let (dest, source) = mapping
        .split_once('=')
        .with_context(|| format!("expected DEST=SOURCE, got '{}'", mapping))?;
    if dest.is_empty() || source.is_empty() {
        anyhow::bail!("expected DEST=SOURCE, got '{}'", mapping);
    }
    Ok((dest.to_string(), source.to_string()))
}

/// Read one file at a branch tip or commit
#[derive(Args, Debug)]
pub struct FileArgs {
    #[command(flatten)]
    pub target: Target,

    /// Path from the repository root
    pub path: String,

    /// Branch to read from
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Commit to read at (wins over --branch)
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Include the file content
    #[arg(long)]
    pub content: bool,

    /// Include the last commit that changed the file
    #[arg(long)]
    pub last_commit: bool,

    /// Write the content to this file instead of printing it
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FileArgs {
    /// Execute the file command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let request = GetFileRequest {
            commit: self.commit.clone(),
            branch: self.branch.clone(),
            path: self.path.clone(),
            with_content: self.content || self.output.is_some(),
            with_last_commit: self.last_commit,
        };
        let fetched = service.get_file(&self.target.id(), caller, request).await?;

        let mut value = serde_json::to_value(&fetched.info)?;
        if let Value::Object(map) = &mut value {
            // Raw bytes are not useful as a JSON array
            map.remove("content");
            if let (Some(content), None) = (&fetched.info.content, &self.output) {
                match std::str::from_utf8(content) {
                    Ok(text) => {
                        map.insert("content".to_string(), Value::String(text.to_string()));
                    }
                    Err(_) => {
                        map.insert("content_omitted".to_string(), json!("binary"));
                    }
                }
            }
        }

        if let (Some(output), Some(mut stream)) = (&self.output, fetched.stream) {
            let mut bytes = Vec::with_capacity(stream.len());
            stream.read_to_end(&mut bytes)?;
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::info!(path = %output.display(), bytes = bytes.len(), "Wrote file content");
        }

        print_json(&value)
    }
}

/// List a directory at a branch tip
#[derive(Args, Debug)]
pub struct LsArgs {
    #[command(flatten)]
    pub target: Target,

    /// Directory path ending in '/' ('/' for the root)
    #[arg(default_value = "/")]
    pub dir: String,

    /// Branch to list
    #[arg(short, long)]
    pub branch: String,

    /// Decorate entries with the last commit that changed them
    #[arg(long)]
    pub last_commit: bool,
}

impl LsArgs {
    /// Execute the ls command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let files = service
            .list_files(&self.target.id(), caller, &self.dir, &self.branch, self.last_commit)
            .await?;
        print_json(&files)
    }
}

/// Add files to a branch, commit and push
#[derive(Args, Debug)]
pub struct AddArgs {
    #[command(flatten)]
    pub target: Target,

    /// Branch to commit to
    #[arg(short, long)]
    pub branch: String,

    /// Commit message
    #[arg(short, long)]
    pub message: String,

    /// Local files to add, as DEST=LOCAL_PATH
    pub files: Vec<String>,

    /// Previously uploaded files to add, as DEST=UPLOAD_NAME
    #[arg(long)]
    pub staged: Vec<String>,

    /// A .tar.gz to unpack (must be the only source)
    #[arg(long, conflicts_with_all = ["files", "staged"])]
    pub archive: Option<PathBuf>,

    /// Directory to unpack the archive into
    #[arg(long, default_value = "/", requires = "archive")]
    pub dest: String,
}

impl AddArgs {
    async fn collect_files(&self) -> anyhow::Result<Vec<NewFile>> {
        let mut files = Vec::new();
        if let Some(archive) = &self.archive {
            let bytes = tokio::fs::read(archive)
                .await
                .with_context(|| format!("failed to read {}", archive.display()))?;
            files.push(NewFile {
                path: self.dest.clone(),
                source: FileSource::Archive(bytes),
            });
            return Ok(files);
        }

        for mapping in &self.files {
            let (dest, local) = split_mapping(mapping)?;
            let bytes = tokio::fs::read(&local)
                .await
                .with_context(|| format!("failed to read {}", local))?;
            files.push(NewFile {
                path: dest,
                source: FileSource::Inline(bytes),
            });
        }
        for mapping in &self.staged {
            let (dest, name) = split_mapping(mapping)?;
            files.push(NewFile {
                path: dest,
                source: FileSource::Staged(name),
            });
        }
        Ok(files)
    }

    /// Execute the add command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let input = AddFilesInput {
            branch: self.branch.clone(),
            message: self.message.clone(),
            files: self.collect_files().await?,
        };
        let commit = service.add_files(&self.target.id(), caller, input).await?;
        print_json(&commit)
    }
}

/// Remove files from a branch, commit and push
#[derive(Args, Debug)]
pub struct RmArgs {
    #[command(flatten)]
    pub target: Target,

    /// Branch to commit to
    #[arg(short, long)]
    pub branch: String,

    /// Commit message
    #[arg(short, long)]
    pub message: String,

    /// Paths to remove (directories are removed recursively)
    #[arg(required = true)]
    pub paths: Vec<String>,
}

impl RmArgs {
    /// Execute the rm command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let input = DeleteFilesInput {
            branch: self.branch.clone(),
            message: self.message.clone(),
            paths: self.paths.clone(),
        };
        let commit = service.delete_files(&self.target.id(), caller, input).await?;
        print_json(&commit)
    }
}

/// Stage local files for a later `add --staged`
#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub target: Target,

    /// Files to upload; each is staged under its file name
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl UploadArgs {
    /// Execute the upload command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let mut blobs = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            blobs.push((name, bytes));
        }
        let staged = service.upload_files(&self.target.id(), caller, blobs).await?;
        print_json(&staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_mapping() {
        assert_eq!(
            split_mapping("deploy/app.yaml=./app.yaml").unwrap(),
            ("deploy/app.yaml".to_string(), "./app.yaml".to_string())
        );
        assert!(split_mapping("no-equals").is_err());
        assert!(split_mapping("=x").is_err());
        assert!(split_mapping("x=").is_err());
    }

    #[tokio::test]
    async fn test_collect_inline_and_staged() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("values.yaml");
        std::fs::write(&local, "a: 1").unwrap();

        let args = AddArgs {
            target: Target {
                namespace: "a".into(),
                repo: "b".into(),
                user: None,
            },
            branch: "main".into(),
            message: "m".into(),
            files: vec![format!("chart/values.yaml={}", local.display())],
            staged: vec!["bin/tool=tool".into()],
            archive: None,
            dest: "/".into(),
        };
        let files = args.collect_files().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].source, FileSource::Inline(b"a: 1".to_vec()));
        assert_eq!(files[1].path, "bin/tool");
        assert_eq!(files[1].source, FileSource::Staged("tool".into()));
    }
}
