//! gitops-repo core - managed git clones behind a small repository service
//!
//! This crate resolves namespaced repository identities to local clones,
//! answers history and file queries against them, and runs the
//! checkout/clean/mutate/commit/push pipeline for writes.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod git;
pub mod pagination;
pub mod secrets;
pub mod service;
pub mod staging;

pub use config::Config;
pub use descriptor::{DescriptorStore, Descriptors, FileDescriptorStore, RepositoryDescriptor, RepositoryId, TlsPolicy};
pub use error::{Error, ErrorKind, Result};
pub use git::{
    AddFilesInput, BranchInfo, Commit, DeleteFilesInput, FetchedFile, FileInfo, FileSource, GetFileRequest, GitRepo,
    NewFile, RepoConfig, RepositoryManager,
};
pub use pagination::{ListOptions, Page};
pub use secrets::{Credential, CredentialStore, Secrets, SecretsFile};
pub use service::{Caller, RepositoryService};
pub use staging::{StagedUpload, UploadStaging};
