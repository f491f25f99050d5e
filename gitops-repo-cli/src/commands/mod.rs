//! CLI command implementations

pub mod branches;
pub mod files;
pub mod history;
pub mod repo;

pub use branches::{BranchArgs, BranchesArgs};
pub use files::{AddArgs, FileArgs, LsArgs, RmArgs, UploadArgs};
pub use history::{CommitArgs, CommitsArgs};
pub use repo::{ConfigArgs, DeleteCloneArgs, SetConfigArgs};

use clap::Args;
use gitops_repo_core::{Config, ListOptions, RepositoryId};

/// Which repository to act on, and as whom
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Repository namespace
    #[arg(short, long, env = "GITOPS_REPO_NAMESPACE")]
    pub namespace: String,

    /// Repository name within the namespace
    #[arg(short, long)]
    pub repo: String,

    /// Acting user (defaults to identity.default_user)
    #[arg(short, long)]
    pub user: Option<String>,
}

impl Target {
    pub fn id(&self) -> RepositoryId {
        RepositoryId::new(&self.namespace, &self.repo)
    }

    pub fn caller<'a>(&'a self, config: &'a Config) -> &'a str {
        self.user.as_deref().unwrap_or(&config.identity.default_user)
    }
}

/// Page selection shared by listing commands
#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: i64,

    /// Items per page
    #[arg(long, default_value_t = gitops_repo_core::pagination::DEFAULT_LIMIT)]
    pub limit: i64,
}

impl From<PageArgs> for ListOptions {
    fn from(args: PageArgs) -> Self {
        ListOptions::new(args.page, args.limit)
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
