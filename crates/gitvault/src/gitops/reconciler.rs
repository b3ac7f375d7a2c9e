//! Reconciliation loop: pull → apply → push.
//!
//! One run at a time. A run that finds the loop busy returns
//! [`SyncOutcome::Busy`] without touching git.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;
use walkdir::WalkDir;

use super::applier::{self, key_for_path};
use super::batch::{commit_message, unique_paths, ChangeType};
use super::context::IacContext;
use super::error::{GitOpsError, Result};
use super::git::CommitInfo;
use super::ordering::{order_for_apply, order_for_delete};
use super::recovery::RecoveryController;
use super::resource::{ResourceKey, MANIFEST_EXTENSION};
use super::status::{ErrorSlot, LoopState, SyncState};

/// Days of history in the commit pulse.
const PULSE_DAYS: usize = 90;

/// Attempts at removing the working copy during a reset.
pub const RESET_RETRIES: u32 = 3;

/// Counters of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub head: Option<String>,
    pub applied: usize,
    pub deleted: usize,
    pub failed: usize,
    pub pushed_changes: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Another run or a repository setup was in progress.
    Busy,
    Completed(SyncReport),
}

pub struct Reconciler {
    ctx: Arc<IacContext>,
    recovery: RecoveryController,
    /// Prevents concurrent runs from corrupting the working copy.
    sync_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(ctx: Arc<IacContext>) -> Self {
        Self {
            recovery: RecoveryController::new(Arc::clone(&ctx)),
            ctx,
            sync_lock: Mutex::new(()),
        }
    }

    /// Runs one reconciliation unless another one is in progress.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        if self.ctx.is_setup_in_progress() {
            log::debug!("Sync skipped: repository setup in progress");
            return Ok(SyncOutcome::Busy);
        }

        let _guard = match self.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Sync skipped: another sync is already in progress");
                return Ok(SyncOutcome::Busy);
            }
        };

        let status = &self.ctx.status;
        status.set_loop_state(LoopState::Running);
        let started = Instant::now();

        let result = self
            .run_sync()
            .instrument(tracing::info_span!("iac.sync"))
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                status.set_error(ErrorSlot::Sync, None);
                status.set_loop_state(LoopState::Idle);
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) if e.needs_reset() => {
                log::error!("Sync failed, resetting the local repository: {}", e);
                if let Err(reset_err) = self.recovery.reset(RESET_RETRIES).await {
                    log::error!("Repository reset failed: {}", reset_err);
                }
                status.set_error(ErrorSlot::Sync, Some(e.to_string()));
                status.set_loop_state(LoopState::FailedUnrecoverable);
                Err(e)
            }
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("Sync failed, retrying on the next tick: {}", e);
                } else {
                    log::error!("Sync failed: {}", e);
                }
                status.set_error(ErrorSlot::Sync, Some(e.to_string()));
                status.set_loop_state(LoopState::FailedRecoverable);
                Err(e)
            }
        };

        status.finish_sync(duration_ms);
        outcome
    }

    async fn run_sync(&self) -> Result<SyncReport> {
        let ctx = &self.ctx;
        let policy = &ctx.policy;
        let mut report = SyncReport::default();

        if !ctx.git.is_git_repo() {
            ctx.status
                .set_error(ErrorSlot::Repo, Some(GitOpsError::GitNotInitialized.to_string()));
            return Err(GitOpsError::GitNotInitialized);
        }
        ctx.status.set_error(ErrorSlot::Repo, None);

        if !ctx.git.has_remotes()? {
            if !policy.has_repo_url() {
                ctx.status
                    .set_error(ErrorSlot::Remote, Some(GitOpsError::GitNoRemote.to_string()));
                return Err(GitOpsError::GitNoRemote);
            }
            log::warn!("Remote origin missing, adding it again");
            ctx.git.set_remote(&policy.repo_url).inspect_err(|e| {
                ctx.status.set_error(ErrorSlot::Remote, Some(e.to_string()))
            })?;
        }
        ctx.status.set_error(ErrorSlot::Remote, None);

        if policy.allow_pull {
            let previous_head = ctx.git.head_commit()?.map(|commit| commit.hash);
            self.pull()?;

            if let Some(head) = ctx.git.head_commit()? {
                report.head = Some(head.hash.clone());
                let last_applied = ctx.status.last_applied_hash();
                if last_applied.as_deref() != Some(head.hash.as_str()) || !ctx.initial_apply_done()
                {
                    let from = if ctx.initial_apply_done() {
                        last_applied.or(previous_head)
                    } else {
                        None
                    };
                    self.apply_commit(head, from, &mut report).await?;
                }
            }
        }

        if policy.allow_push {
            self.push_pending(&mut report)?;
        }

        self.refresh_repo_stats();
        Ok(report)
    }

    fn pull(&self) -> Result<()> {
        let status = &self.ctx.status;
        match self.ctx.git.pull() {
            Ok(()) => {
                status.set_error(ErrorSlot::Pull, None);
                Ok(())
            }
            Err(GitOpsError::GitEmptyRemote(message)) => {
                log::debug!("Remote branch is empty: {}", message);
                status.set_error(ErrorSlot::Pull, None);
                Ok(())
            }
            Err(e) => {
                status.set_error(ErrorSlot::Pull, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Applies the files changed between `from` and `head` to the cluster.
    async fn apply_commit(
        &self,
        head: CommitInfo,
        from: Option<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let changed = self
            .ctx
            .git
            .changed_files(from.as_deref(), &head.hash)?
            .yaml_only();

        log::info!(
            "Applying commit {} ({} updated, {} deleted)",
            head.hash,
            changed.updated.len(),
            changed.deleted.len()
        );

        let updated = order_for_apply(changed.updated);
        let deleted = order_for_delete(changed.deleted);
        self.apply_paths(&updated, &deleted, report).await;

        self.ctx.mark_initial_apply_done();
        self.ctx.status.set_last_applied(head);
        self.ctx.status.set_recent_files(updated, deleted);
        Ok(())
    }

    /// Applies then deletes, recording per-resource status. Failures of single
    /// resources are counted, never fatal.
    async fn apply_paths(
        &self,
        updated: &[String],
        deleted: &[String],
        report: &mut SyncReport,
    ) {
        let ctx = &self.ctx;

        for path in updated {
            let Ok(key) = key_for_path(path) else {
                log::warn!("Skipping unexpected path {}", path);
                continue;
            };
            if ctx.policy.is_key_ignored(&key) {
                log::debug!("Skipping ignored {}", key);
                continue;
            }
            match applier::apply_file(ctx, path).await {
                Ok(_) => {
                    ctx.status.set_resource_state(&key, SyncState::Synced);
                    report.applied += 1;
                }
                Err(e) => {
                    log::error!("Failed to apply {}: {}", path, e);
                    ctx.status.set_resource_error(&key, &e);
                    report.failed += 1;
                }
            }
        }

        for path in deleted {
            let Ok(key) = key_for_path(path) else {
                log::warn!("Skipping unexpected path {}", path);
                continue;
            };
            if ctx.policy.is_key_ignored(&key) {
                log::debug!("Skipping ignored {}", key);
                continue;
            }
            match applier::delete_resource(ctx, &key).await {
                Ok(()) => {
                    ctx.status.set_resource_state(&key, SyncState::Deleted);
                    report.deleted += 1;
                }
                Err(e) => {
                    log::error!("Failed to delete {}: {}", key, e);
                    ctx.status.set_resource_error(&key, &e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Commits and pushes everything queued. Entries are only dropped from the
    /// queue after the push succeeded.
    fn push_pending(&self, report: &mut SyncReport) -> Result<()> {
        let ctx = &self.ctx;
        let entries = ctx.queue.snapshot();
        if entries.is_empty() {
            return Ok(());
        }

        let base = ctx.git.head_commit()?.map(|commit| commit.hash);
        let committed = ctx
            .git
            .commit(&unique_paths(&entries), &commit_message(&entries))
            .inspect_err(|e| ctx.status.set_error(ErrorSlot::Push, Some(e.to_string())))?;

        let Some(head) = ctx.git.head_commit()? else {
            log::debug!("Nothing to push for {} queued changes", entries.len());
            ctx.queue.remove_pushed(&entries);
            return Ok(());
        };

        if let Err(e) = ctx.git.push() {
            ctx.status.set_error(ErrorSlot::Push, Some(e.to_string()));
            return Err(e);
        }

        ctx.queue.remove_pushed(&entries);
        ctx.status.set_error(ErrorSlot::Push, None);
        if committed.is_some() {
            report.pushed_changes = entries.len();
        }
        log::info!(
            "Pushed {} changes as {}",
            entries.len(),
            committed.as_deref().unwrap_or(head.hash.as_str())
        );

        for entry in &entries {
            if entry.change_type == ChangeType::Modify {
                if let Ok(key) = key_for_path(&entry.path) {
                    ctx.status.set_resource_state(&key, SyncState::Synced);
                }
            }
        }

        // Our own commit on top of the applied one needs no re-apply.
        if base.is_some() && ctx.status.last_applied_hash() == base {
            ctx.status.set_last_applied(head.clone());
        }
        ctx.status.set_last_push(head);
        Ok(())
    }

    fn refresh_repo_stats(&self) {
        let git = &self.ctx.git;
        let pulse = git.pulse(PULSE_DAYS).unwrap_or_else(|e| {
            log::debug!("Failed to read commit pulse: {}", e);
            Default::default()
        });
        let contributors = git.contributors().unwrap_or_else(|e| {
            log::debug!("Failed to read contributors: {}", e);
            Vec::new()
        });
        let number_of_files = manifest_paths(&self.ctx).len();
        self.ctx
            .status
            .set_repo_stats(pulse, contributors, number_of_files);
    }

    /// Applies every manifest in the working copy, namespaces first.
    pub async fn apply_repo_state(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let started = Instant::now();

        let mut report = SyncReport::default();
        let paths = order_for_apply(manifest_paths(&self.ctx));
        log::info!("Applying {} manifests from the repository", paths.len());
        self.apply_paths(&paths, &[], &mut report)
            .instrument(tracing::info_span!("iac.apply_repo_state"))
            .await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Verifies that the remote is reachable with the configured credentials.
    pub fn check_repo_access(&self) -> Result<()> {
        let policy = &self.ctx.policy;
        if !policy.has_repo_url() || policy.repo_pat.is_none() {
            return Err(GitOpsError::MissingCredentials);
        }
        match self.ctx.git.ls_remote(&policy.repo_url) {
            Ok(()) => {
                self.ctx.status.set_error(ErrorSlot::Remote, None);
                Ok(())
            }
            Err(e) => {
                self.ctx
                    .status
                    .set_error(ErrorSlot::Remote, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Restores one manifest to its content at `commit`, applies it and
    /// queues it for the next push.
    pub async fn reset_file_to_commit(&self, relative_path: &str, commit: &str) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        let key = key_for_path(relative_path)?;

        self.ctx.git.restore_file(commit, relative_path)?;
        if let Err(e) = applier::apply_file(&self.ctx, relative_path).await {
            self.ctx.status.set_resource_error(&key, &e);
            return Err(e);
        }
        self.ctx.status.set_resource_state(&key, SyncState::Synced);

        if self.ctx.policy.allow_push {
            let short: String = commit.chars().take(7).collect();
            self.ctx.enqueue_message(
                &key,
                ChangeType::Modify,
                format!("Reset {} to {}.", key, short),
            );
        }
        Ok(())
    }

    /// Discards the working copy and sets it up again from the remote.
    pub async fn reset_repository(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.recovery.reset(RESET_RETRIES).await
    }
}

/// Repository-relative paths of all manifests in the working copy, sorted.
fn manifest_paths(ctx: &IacContext) -> Vec<String> {
    let root = ctx.data_path();
    let mut paths: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().and_then(|ext| ext.to_str()) == Some(MANIFEST_EXTENSION)
        })
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            ResourceKey::from_relative_path(&path).map(|_| path)
        })
        .collect();
    paths.sort();
    paths
}
