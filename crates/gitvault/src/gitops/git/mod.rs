//! Git porcelain used by the reconciliation engine.

pub mod auth;
pub mod parse;
pub mod repository;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

pub use repository::{GitIdentity, GitRepository};
pub use types::*;

use crate::gitops::error::Result;

/// Git operations the engine depends on.
///
/// All calls are blocking; the loop is single-flight so that is fine.
pub trait GitBackend: Send + Sync {
    /// Working copy root, also the IaC data directory.
    fn repo_path(&self) -> &Path;

    fn branch(&self) -> &str;

    fn is_git_repo(&self) -> bool;

    /// Initializes an empty repository if none exists.
    fn init(&self) -> Result<()>;

    /// Adds `origin` or updates its URL.
    fn set_remote(&self, url: &str) -> Result<()>;

    fn has_remotes(&self) -> Result<bool>;

    /// Fetches the configured branch from `origin`.
    ///
    /// Fails with `GitEmptyRemote` when the branch does not exist remotely.
    fn fetch(&self) -> Result<()>;

    /// Resets the local branch onto `origin/<branch>`.
    fn checkout_remote_branch(&self) -> Result<()>;

    /// Creates (or resets) the local branch at the current HEAD.
    fn checkout_new_branch(&self) -> Result<()>;

    /// `None` while the repository has no commits.
    fn head_commit(&self) -> Result<Option<CommitInfo>>;

    /// Fast-forward pull of the configured branch.
    fn pull(&self) -> Result<()>;

    fn push(&self) -> Result<()>;

    /// Stages the given paths (including removals) and commits them.
    ///
    /// Returns `None` when nothing was staged.
    fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>>;

    /// Creates a commit even if the tree did not change.
    fn commit_empty(&self, message: &str) -> Result<String>;

    /// Files changed between two commits. `from = None` lists every tracked file at `to`.
    fn changed_files(&self, from: Option<&str>, to: &str) -> Result<ChangedPaths>;

    fn contributors(&self) -> Result<Vec<Contributor>>;

    /// Commits per day over the last `max_days` days.
    fn pulse(&self, max_days: usize) -> Result<BTreeMap<String, u32>>;

    /// Checks that the remote is reachable with the configured credentials.
    fn ls_remote(&self, url: &str) -> Result<()>;

    /// Restores one file to its content at `commit`.
    fn restore_file(&self, commit: &str, path: &str) -> Result<()>;
}
