//! Branch commands

use clap::Args;
use gitops_repo_core::RepositoryService;

use super::{print_json, PageArgs, Target};

/// List branches
#[derive(Args, Debug)]
pub struct BranchesArgs {
    #[command(flatten)]
    pub target: Target,

    #[command(flatten)]
    pub page: PageArgs,

    /// List branches of the local clone instead of the remote
    #[arg(long)]
    pub local: bool,

    /// Include a HEAD entry for the current checkout
    #[arg(long)]
    pub with_head: bool,
}

impl BranchesArgs {
    /// Execute the branches command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let page = service
            .list_branches(&self.target.id(), caller, self.page.into(), !self.local, self.with_head)
            .await?;
        print_json(&page)
    }
}

/// Show one remote branch
#[derive(Args, Debug)]
pub struct BranchArgs {
    #[command(flatten)]
    pub target: Target,

    /// Branch name
    pub name: String,
}

impl BranchArgs {
    /// Execute the branch command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let branch = service.get_branch(&self.target.id(), caller, &self.name).await?;
        print_json(&branch)
    }
}
