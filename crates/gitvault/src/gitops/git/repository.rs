//! Git repository operations backed by the `git` CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use secrecy::SecretString;

use super::auth::{build_auth_env, redact_url};
use super::parse::{
    format_git_error, parse_commit_record, parse_contributors, parse_name_status, parse_pulse,
};
use super::types::*;
use super::GitBackend;
use crate::gitops::error::{classify_git_error, GitOpsError, Result};

/// Author identity for commits made by the agent.
#[derive(Debug, Clone)]
pub struct GitIdentity {
    pub user_name: String,
    pub user_email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            user_name: "gitvault".to_string(),
            user_email: "gitvault@localhost".to_string(),
        }
    }
}

/// Git working copy of the IaC repository.
pub struct GitRepository {
    repo_path: PathBuf,
    branch: String,
    identity: GitIdentity,
    token: Option<SecretString>,
}

impl GitRepository {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        branch: impl Into<String>,
        identity: GitIdentity,
        token: Option<SecretString>,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
            identity,
            token,
        }
    }

    fn has_commits(&self) -> bool {
        self.is_git_repo()
            && self
                .run_git(&["rev-parse", "--verify", "--quiet", "HEAD"])
                .map(|output| output.status.success())
                .unwrap_or(false)
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Runs a git command in the repository directory.
    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))
    }

    /// Runs a git command and returns stdout, classifying failures.
    fn run_git_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Runs a network git command with the token exposed through askpass.
    fn run_git_authenticated(&self, args: &[&str]) -> Result<String> {
        let auth = build_auth_env(self.token.as_ref())?;

        let workdir = if self.repo_path.exists() {
            self.repo_path.clone()
        } else {
            std::env::temp_dir()
        };

        let mut cmd = Command::new("git");
        cmd.current_dir(workdir).args(args);
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))?;

        drop(auth);

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Commit with the agent identity, independent of any global git config.
    fn run_commit(&self, extra: &[&str]) -> Result<String> {
        let name = format!("user.name={}", self.identity.user_name);
        let email = format!("user.email={}", self.identity.user_email);
        let mut args = vec!["-c", name.as_str(), "-c", email.as_str(), "commit"];
        args.extend_from_slice(extra);
        self.run_git_checked(&args)?;

        let hash = self.run_git_checked(&["rev-parse", "HEAD"])?;
        Ok(hash.trim().to_string())
    }
}

impl GitBackend for GitRepository {
    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    fn init(&self) -> Result<()> {
        if self.is_git_repo() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.repo_path).map_err(|e| GitOpsError::WriteFile {
            path: self.repo_path.clone(),
            source: e,
        })?;

        self.run_git_checked(&["init", "--quiet"])?;
        let head_ref = format!("refs/heads/{}", self.branch);
        self.run_git_checked(&["symbolic-ref", "HEAD", &head_ref])?;

        let _ = self.run_git(&["config", "user.email", &self.identity.user_email]);
        let _ = self.run_git(&["config", "user.name", &self.identity.user_name]);

        Ok(())
    }

    fn set_remote(&self, url: &str) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        let remote_exists = self
            .run_git(&["remote", "get-url", "origin"])
            .map(|output| output.status.success())
            .unwrap_or(false);

        if remote_exists {
            self.run_git_checked(&["remote", "set-url", "origin", url])?;
        } else {
            self.run_git_checked(&["remote", "add", "origin", url])?;
        }

        log::debug!("Remote origin set to {}", redact_url(url));
        Ok(())
    }

    fn has_remotes(&self) -> Result<bool> {
        if !self.is_git_repo() {
            return Ok(false);
        }
        let remotes = self.run_git_checked(&["remote"])?;
        Ok(!remotes.trim().is_empty())
    }

    fn fetch(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        self.run_git_authenticated(&["fetch", "--quiet", "origin", &self.branch])?;
        Ok(())
    }

    fn checkout_remote_branch(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        let remote_ref = format!("origin/{}", self.branch);
        self.run_git_checked(&["checkout", "--quiet", "-B", &self.branch, &remote_ref])?;
        let _ = self.run_git(&["branch", "--set-upstream-to", &remote_ref, &self.branch]);
        Ok(())
    }

    fn checkout_new_branch(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        if self.has_commits() {
            self.run_git_checked(&["checkout", "--quiet", "-B", &self.branch])?;
        } else {
            let head_ref = format!("refs/heads/{}", self.branch);
            self.run_git_checked(&["symbolic-ref", "HEAD", &head_ref])?;
        }
        Ok(())
    }

    fn head_commit(&self) -> Result<Option<CommitInfo>> {
        if !self.has_commits() {
            return Ok(None);
        }
        let record = self.run_git_checked(&["log", "-1", "--format=%H%x1f%an%x1f%aI%x1f%B"])?;
        Ok(parse_commit_record(&record))
    }

    fn pull(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        self.run_git_authenticated(&["pull", "--ff-only", "--quiet", "origin", &self.branch])?;
        Ok(())
    }

    fn push(&self) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        self.run_git_authenticated(&["push", "--quiet", "origin", &refspec])?;
        Ok(())
    }

    fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }

        for path in paths {
            if self.repo_path.join(path).exists() {
                self.run_git_checked(&["add", "--", path])?;
            } else {
                self.run_git_checked(&["rm", "--cached", "--ignore-unmatch", "--quiet", "--", path])?;
            }
        }

        let staged = self.run_git(&["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            return Ok(None);
        }

        self.run_commit(&["--quiet", "-m", message]).map(Some)
    }

    fn commit_empty(&self, message: &str) -> Result<String> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        self.run_commit(&["--quiet", "--allow-empty", "-m", message])
    }

    fn changed_files(&self, from: Option<&str>, to: &str) -> Result<ChangedPaths> {
        match from {
            Some(from) if from == to => Ok(ChangedPaths::default()),
            Some(from) => {
                let output =
                    self.run_git_checked(&["diff", "--name-status", "--no-renames", from, to])?;
                Ok(parse_name_status(&output))
            }
            None => {
                let output = self.run_git_checked(&["ls-tree", "-r", "--name-only", to])?;
                Ok(ChangedPaths {
                    updated: output.lines().map(str::to_string).collect(),
                    deleted: Vec::new(),
                })
            }
        }
    }

    fn contributors(&self) -> Result<Vec<Contributor>> {
        if !self.has_commits() {
            return Ok(Vec::new());
        }
        let output = self.run_git_checked(&["log", "--format=%an%x1f%ae%x1f%aI"])?;
        Ok(parse_contributors(&output))
    }

    fn pulse(&self, max_days: usize) -> Result<BTreeMap<String, u32>> {
        if !self.has_commits() {
            return Ok(BTreeMap::new());
        }
        let since = format!("--since={} days ago", max_days);
        let output = self.run_git_checked(&["log", &since, "--format=%ad", "--date=short"])?;
        Ok(parse_pulse(&output, max_days))
    }

    fn ls_remote(&self, url: &str) -> Result<()> {
        self.run_git_authenticated(&["ls-remote", "--heads", url])?;
        Ok(())
    }

    fn restore_file(&self, commit: &str, path: &str) -> Result<()> {
        if !self.is_git_repo() {
            return Err(GitOpsError::GitNotInitialized);
        }
        self.run_git_checked(&["checkout", commit, "--", path])?;
        Ok(())
    }
}
