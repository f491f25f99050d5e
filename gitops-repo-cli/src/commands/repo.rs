//! Repository configuration and clone maintenance commands

use clap::Args;
use gitops_repo_core::{RepoConfig, RepositoryService};
use serde_json::json;

use super::{print_json, Target};

/// Show user identity and origin URL of the clone
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub target: Target,
}

impl ConfigArgs {
    /// Execute the config command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let config = service.get_config(&self.target.id(), caller).await?;
        print_json(&config)
    }
}

/// Update user identity or origin URL of the clone
#[derive(Args, Debug)]
pub struct SetConfigArgs {
    #[command(flatten)]
    pub target: Target,

    /// Value for user.name
    #[arg(long)]
    pub user_name: Option<String>,

    /// Value for user.email
    #[arg(long)]
    pub user_email: Option<String>,

    /// New URL for the origin remote
    #[arg(long)]
    pub remote_url: Option<String>,
}

impl SetConfigArgs {
    fn update(&self) -> Option<RepoConfig> {
        if self.user_name.is_none() && self.user_email.is_none() && self.remote_url.is_none() {
            return None;
        }
        Some(RepoConfig {
            user_name: self.user_name.clone(),
            user_email: self.user_email.clone(),
            remote_url: self.remote_url.clone(),
        })
    }

    /// Execute the set-config command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let config = service
            .update_config(&self.target.id(), caller, self.update())
            .await?;
        print_json(&config)
    }
}

/// Remove the local clone; the next command clones again
#[derive(Args, Debug)]
pub struct DeleteCloneArgs {
    #[command(flatten)]
    pub target: Target,
}

impl DeleteCloneArgs {
    /// Execute the delete-clone command
    pub async fn execute(&self, service: &RepositoryService) -> anyhow::Result<()> {
        let caller = self.target.caller(service.config());
        let removed = service.delete_clone(&self.target.id(), caller).await?;
        print_json(&json!({ "repository": self.target.id().to_string(), "removed": removed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_config_without_flags_sends_nothing() {
        let args = SetConfigArgs {
            target: Target {
                namespace: "a".into(),
                repo: "b".into(),
                user: None,
            },
            user_name: None,
            user_email: None,
            remote_url: None,
        };
        assert!(args.update().is_none());

        let args = SetConfigArgs {
            user_email: Some("x@example.com".into()),
            ..args
        };
        assert_eq!(args.update().unwrap().user_email.as_deref(), Some("x@example.com"));
    }
}
