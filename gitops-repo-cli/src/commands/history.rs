//! Commit history commands

use clap::Args;
use gitops_repo_core::RepositoryService;

use super::{print_json, PageArgs, Target};

/// List commits on a branch, newest first
#[derive(Args, Debug)]
pub struct CommitsArgs {
    #[command(flatten)]
    pub target: Target,

    #[command(flatten)]
    pub page: PageArgs,

    /// Branch to walk
    pub branch: String,

    /// Only commits that changed this path
    #[arg(short, long)]
    pub file: Option<String>,
}

impl CommitsArgs {
    /// Execute the commits command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let page = service
            .list_commits(&self.target.id(), caller, &self.branch, self.file.as_deref(), self.page.into())
            .await?;
        print_json(&page)
    }
}

/// Show one commit
#[derive(Args, Debug)]
pub struct CommitArgs {
    #[command(flatten)]
    pub target: Target,

    /// Full or abbreviated commit hash
    pub hash: String,
}

impl CommitArgs {
    /// Execute the commit command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let commit = service.get_commit(&self.target.id(), caller, &self.hash).await?;
        print_json(&commit)
    }
}
