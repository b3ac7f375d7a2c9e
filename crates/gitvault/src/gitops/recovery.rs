//! Destructive reset of the local working copy.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::context::IacContext;
use super::error::{GitOpsError, Result};
use super::status::ErrorSlot;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Message of the commit that creates the branch on an empty remote.
pub const INIT_COMMIT_MESSAGE: &str = "init";

pub struct RecoveryController {
    ctx: Arc<IacContext>,
}

impl RecoveryController {
    pub fn new(ctx: Arc<IacContext>) -> Self {
        Self { ctx }
    }

    /// Deletes the working copy and sets it up again.
    ///
    /// Pending changes and all status are dropped; the next sync applies the
    /// full tree again. Watch events are skipped while this runs.
    pub async fn reset(&self, retries: u32) -> Result<()> {
        let Some(_setup) = self.ctx.begin_setup() else {
            return Err(GitOpsError::SyncInProgress);
        };

        async {
            log::warn!("Resetting repository at {}", self.ctx.data_path().display());

            self.ctx.queue.clear();
            self.ctx.status.reset();
            self.ctx.reset_initial_apply();

            remove_dir_with_retries(self.ctx.data_path(), retries).await?;

            let result = self.reinitialize();
            match &result {
                Ok(()) => log::info!("Repository reset complete"),
                Err(e) => {
                    log::error!("Repository setup failed: {}", e);
                    let slot = if matches!(e, GitOpsError::GitOperation(_)) {
                        ErrorSlot::Repo
                    } else {
                        ErrorSlot::Remote
                    };
                    self.ctx.status.set_error(slot, Some(e.to_string()));
                }
            }
            result
        }
        .instrument(tracing::info_span!("iac.reset"))
        .await
    }

    fn reinitialize(&self) -> Result<()> {
        let git = &self.ctx.git;
        let policy = &self.ctx.policy;

        git.init()?;
        if !policy.has_repo_url() {
            return git.checkout_new_branch();
        }

        git.set_remote(&policy.repo_url)?;
        match git.fetch() {
            Ok(()) => git.checkout_remote_branch(),
            Err(GitOpsError::GitEmptyRemote(_)) => {
                log::info!(
                    "Remote branch {} does not exist, creating it",
                    git.branch()
                );
                git.checkout_new_branch()?;
                git.commit_empty(INIT_COMMIT_MESSAGE)?;
                if policy.allow_push {
                    git.push()?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn remove_dir_with_retries(path: &Path, retries: u32) -> Result<()> {
    let attempts = retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if !path.exists() {
            return Ok(());
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!(
                    "Failed to remove {} (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    attempts,
                    e
                );
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    Err(GitOpsError::FileOperation(format!(
        "Failed to remove '{}': {}",
        path.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::batch::ChangeType;
    use crate::gitops::git::{GitBackend, GitIdentity, GitRepository};
    use crate::gitops::resource::ResourceKey;
    use crate::gitops::status::SyncState;
    use crate::gitops::testing::{context_at, policy};
    use std::path::PathBuf;
    use std::process::Command;
    use tempfile::TempDir;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Runtime::new().unwrap().block_on(future)
    }

    fn bare_remote(dir: &TempDir) -> PathBuf {
        let remote = dir.path().join("remote.git");
        let output = Command::new("git")
            .args(["init", "--bare", "--quiet"])
            .arg(&remote)
            .output()
            .unwrap();
        assert!(output.status.success());
        remote
    }

    fn remote_head(remote: &Path) -> Option<String> {
        let output = Command::new("git")
            .current_dir(remote)
            .args(["rev-parse", "--verify", "--quiet", "refs/heads/main"])
            .output()
            .unwrap();
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    #[test]
    fn test_reset_without_remote_initializes_and_clears_state() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        let ctx = Arc::new(context_at(&work, policy(true, true)));

        std::fs::create_dir_all(work.join("configmaps/web")).unwrap();
        std::fs::write(work.join("configmaps/web/stale.yaml"), "kind: ConfigMap\n").unwrap();
        let key = ResourceKey::new("configmaps", Some("web"), "stale");
        ctx.enqueue(&key, ChangeType::Modify, "Updated");
        ctx.status.set_resource_state(&key, SyncState::PendingSync);
        ctx.mark_initial_apply_done();

        block_on(RecoveryController::new(Arc::clone(&ctx)).reset(3)).unwrap();

        assert!(ctx.git.is_git_repo());
        assert!(!work.join("configmaps").exists());
        assert!(ctx.queue.is_empty());
        assert!(ctx.status.resource_statuses().is_empty());
        assert!(!ctx.initial_apply_done());
        assert!(!ctx.is_setup_in_progress());
    }

    #[test]
    fn test_reset_against_empty_remote_pushes_init_commit() {
        let dir = TempDir::new().unwrap();
        let remote = bare_remote(&dir);
        let mut policy = policy(true, true);
        policy.repo_url = remote.to_string_lossy().into_owned();
        let ctx = Arc::new(context_at(&dir.path().join("work"), policy));

        block_on(RecoveryController::new(Arc::clone(&ctx)).reset(1)).unwrap();

        let head = ctx.git.head_commit().unwrap().unwrap();
        assert_eq!(head.message, INIT_COMMIT_MESSAGE);
        assert_eq!(remote_head(&remote).as_deref(), Some(head.hash.as_str()));
    }

    #[test]
    fn test_reset_pull_only_does_not_push_init_commit() {
        let dir = TempDir::new().unwrap();
        let remote = bare_remote(&dir);
        let mut policy = policy(true, false);
        policy.repo_url = remote.to_string_lossy().into_owned();
        let ctx = Arc::new(context_at(&dir.path().join("work"), policy));

        block_on(RecoveryController::new(Arc::clone(&ctx)).reset(1)).unwrap();

        assert!(ctx.git.head_commit().unwrap().is_some());
        assert!(remote_head(&remote).is_none());
    }

    #[test]
    fn test_reset_checks_out_remote_branch() {
        let dir = TempDir::new().unwrap();
        let remote = bare_remote(&dir);
        let url = remote.to_string_lossy().into_owned();

        let seed = GitRepository::new(dir.path().join("seed"), "main", GitIdentity::default(), None);
        seed.init().unwrap();
        seed.set_remote(&url).unwrap();
        std::fs::create_dir_all(seed.repo_path().join("namespaces")).unwrap();
        std::fs::write(seed.repo_path().join("namespaces/web.yaml"), "kind: Namespace\n").unwrap();
        let seeded = seed
            .commit(&["namespaces/web.yaml".to_string()], "seed")
            .unwrap()
            .unwrap();
        seed.push().unwrap();

        let mut policy = policy(true, true);
        policy.repo_url = url;
        let work = dir.path().join("work");
        let ctx = Arc::new(context_at(&work, policy));

        block_on(RecoveryController::new(Arc::clone(&ctx)).reset(1)).unwrap();

        assert_eq!(ctx.git.head_commit().unwrap().unwrap().hash, seeded);
        assert!(work.join("namespaces/web.yaml").exists());
    }

    #[test]
    fn test_concurrent_reset_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let _setup = ctx.begin_setup().unwrap();

        let err = block_on(RecoveryController::new(Arc::clone(&ctx)).reset(1)).unwrap_err();
        assert!(matches!(err, GitOpsError::SyncInProgress));
    }
}
