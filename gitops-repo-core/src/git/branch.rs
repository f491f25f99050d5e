//! Branch listing, lookup and fetching

use git2::build::CheckoutBuilder;
use git2::{BranchType, Direction, ErrorCode, Oid};
use serde::Serialize;
use tracing::{debug, warn};

use super::commit::Commit;
use super::repo::{GitRepo, ORIGIN};
use crate::pagination::{compare_branch_names, ListOptions, Page};
use crate::{Error, Result};

/// Name of the pseudo-branch for the current checkout
pub const HEAD: &str = "HEAD";

/// A branch and the commit it points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    /// Full reference name (e.g., "refs/heads/main")
    pub name: String,
    /// Name without the `refs/heads/` prefix
    pub short_name: String,
    pub commit_hash: String,
    /// Present when the commit object exists locally
    pub head_commit: Option<Commit>,
}

impl GitRepo {
    fn branch_info(&self, name: String, short_name: String, oid: Oid) -> BranchInfo {
        let head_commit = self.inner().find_commit(oid).ok().map(|c| Commit::from_git(&c));
        BranchInfo {
            name,
            short_name,
            commit_hash: oid.to_string(),
            head_commit,
        }
    }

    /// Branch heads advertised by `origin`, as (short name, target)
    fn remote_heads(&self) -> Result<Vec<(String, Oid)>> {
        let transport = self.transport("list remote branches");
        transport.check_deadline()?;

        let mut remote = self.inner().find_remote(ORIGIN)?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(transport.callbacks()), None)
            .map_err(|e| transport.map_error(e))?;

        let heads = connection
            .list()
            .map_err(|e| transport.map_error(e))?
            .iter()
            .filter_map(|head| {
                head.name()
                    .strip_prefix("refs/heads/")
                    .map(|short| (short.to_string(), head.oid()))
            })
            .collect();
        Ok(heads)
    }

    fn local_heads(&self) -> Result<Vec<(String, Oid)>> {
        let mut heads = Vec::new();
        for branch in self.inner().branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let Some(name) = branch.name()? else {
                continue;
            };
            if let Some(target) = branch.get().target() {
                heads.push((name.to_string(), target));
            }
        }
        Ok(heads)
    }

    /// List branches, from the remote's advertisement or the local clone
    ///
    /// With `with_head`, a `HEAD` entry for the current checkout comes first.
    /// Remaining branches put main/master first, then sort alphabetically.
    pub fn list_branches(&self, options: ListOptions, remote: bool, with_head: bool) -> Result<Page<BranchInfo>> {
        let mut heads = if remote { self.remote_heads()? } else { self.local_heads()? };
        heads.sort_by(|a, b| compare_branch_names(&a.0, &b.0));

        let mut branches = Vec::with_capacity(heads.len() + 1);
        if with_head {
            match self.inner().head() {
                Ok(head) => {
                    let oid = head.peel_to_commit()?.id();
                    branches.push(self.branch_info(HEAD.to_string(), HEAD.to_string(), oid));
                }
                Err(e) if e.code() == ErrorCode::UnbornBranch => {}
                Err(e) => return Err(e.into()),
            }
        }
        for (short, oid) in heads {
            branches.push(self.branch_info(format!("refs/heads/{}", short), short, oid));
        }

        debug!(remote, total = branches.len(), "Listed branches");
        Ok(Page::from_vec(branches, options))
    }

    /// Look up one branch on the remote
    pub fn get_branch(&self, name: &str) -> Result<BranchInfo> {
        if name.is_empty() {
            return Err(Error::invalid("branch name is required"));
        }
        let name = name.strip_prefix("refs/heads/").unwrap_or(name);
        self.remote_heads()?
            .into_iter()
            .find(|(short, _)| short == name)
            .map(|(short, oid)| self.branch_info(format!("refs/heads/{}", short), short, oid))
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    /// Fetch one branch into `refs/remotes/origin/<branch>`
    pub fn fetch_branch(&self, branch: &str) -> Result<()> {
        let transport = self.transport("fetch");
        transport.check_deadline()?;

        let mut remote = self.inner().find_remote(ORIGIN)?;
        let refspec = format!("+refs/heads/{b}:refs/remotes/{ORIGIN}/{b}", b = branch);
        remote
            .fetch(&[refspec.as_str()], Some(&mut transport.fetch_options()), None)
            .map_err(|e| {
                if e.code() == ErrorCode::NotFound || e.message().contains("couldn't find remote ref") {
                    Error::BranchNotFound(branch.to_string())
                } else {
                    transport.map_error(e)
                }
            })?;

        // libgit2 accepts a refspec whose source is missing and fetches nothing
        let tracking = format!("refs/remotes/{}/{}", ORIGIN, branch);
        if self.inner().find_reference(&tracking).is_err() {
            return Err(Error::BranchNotFound(branch.to_string()));
        }
        debug!(branch, "Fetched branch");
        Ok(())
    }

    /// Check out a local branch, creating it from `origin/<branch>` if needed
    pub(crate) fn checkout_local(&self, branch: &str, force: bool) -> Result<Oid> {
        let repo = self.inner();
        let local_ref = format!("refs/heads/{}", branch);

        if repo.find_reference(&local_ref).is_err() {
            let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, branch);
            let target = repo
                .find_reference(&remote_ref)
                .map_err(|_| Error::BranchNotFound(branch.to_string()))?
                .peel_to_commit()?;
            let mut created = repo.branch(branch, &target, false)?;
            if let Err(e) = created.set_upstream(Some(&format!("{}/{}", ORIGIN, branch))) {
                warn!(branch, error = %e, "Failed to set upstream");
            }
            debug!(branch, commit = %target.id(), "Created local branch from remote");
        }

        let target = repo.revparse_single(&local_ref)?;
        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force();
        } else {
            checkout.safe();
        }
        repo.checkout_tree(&target, Some(&mut checkout))?;
        repo.set_head(&local_ref)?;
        Ok(target.peel_to_commit()?.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::RemoteFixture;

    #[test]
    fn test_list_remote_branches_ordering() {
        let fixture = RemoteFixture::new();
        fixture.push_branch("feature/x", &[("x.txt", Some("x"))], "x");
        fixture.push_branch("bugfix/y", &[("y.txt", Some("y"))], "y");
        let repo = fixture.local_repo();

        let page = repo.list_branches(ListOptions::default(), true, false).unwrap();
        let names: Vec<_> = page.items.iter().map(|b| b.short_name.as_str()).collect();
        assert_eq!(names, vec!["main", "bugfix/y", "feature/x"]);
        assert_eq!(page.total_items, 3);
        assert_eq!(page.items[0].name, "refs/heads/main");
    }

    #[test]
    fn test_list_branches_with_head_and_paging() {
        let fixture = RemoteFixture::new();
        fixture.push_branch("dev", &[("d.txt", Some("d"))], "d");
        let repo = fixture.local_repo();

        let page = repo.list_branches(ListOptions::new(1, 2), true, true).unwrap();
        assert_eq!(page.total_items, 3);
        assert_eq!(page.items[0].name, HEAD);
        assert_eq!(page.items[0].commit_hash, fixture.remote_tip("main").to_string());
        assert_eq!(page.items[1].short_name, "main");

        let page = repo.list_branches(ListOptions::new(2, 2), true, true).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].short_name, "dev");
    }

    #[test]
    fn test_local_branches() {
        let fixture = RemoteFixture::new();
        fixture.push_branch("dev", &[("d.txt", Some("d"))], "d");
        let repo = fixture.local_repo();

        let page = repo.list_branches(ListOptions::default(), false, false).unwrap();
        let names: Vec<_> = page.items.iter().map(|b| b.short_name.as_str()).collect();
        assert_eq!(names, vec!["main"]);
    }

    #[test]
    fn test_get_branch() {
        let fixture = RemoteFixture::new();
        let tip = fixture.push_branch("dev", &[("d.txt", Some("d"))], "d");
        let repo = fixture.local_repo();

        let branch = repo.get_branch("dev").unwrap();
        assert_eq!(branch.commit_hash, tip.to_string());
        assert_eq!(branch.head_commit.unwrap().summary(), "d");

        assert!(matches!(repo.get_branch("nope"), Err(Error::BranchNotFound(_))));
        assert!(matches!(repo.get_branch(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_fetch_unknown_branch() {
        let fixture = RemoteFixture::new();
        let repo = fixture.local_repo();
        assert!(matches!(repo.fetch_branch("ghost"), Err(Error::BranchNotFound(_))));
    }
}
