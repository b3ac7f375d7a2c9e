//! Entry point of the reconciliation engine.
//!
//! [`IacManager`] wires the drift handler, the reconciler and the scheduler
//! around one shared [`IacContext`] and exposes the read-only status views.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::cluster::ClusterClient;
use crate::config::{AgentConfig, PolicySummary, SyncPolicy};
use crate::error::GitVaultError;
use crate::secrets::SecretCipher;

use super::batch::ChangedFile;
use super::context::IacContext;
use super::error::Result;
use super::git::{GitBackend, GitIdentity, GitRepository};
use super::guard::{DriftHandler, DriftOutcome};
use super::normalize::Normalizer;
use super::reconciler::{Reconciler, SyncOutcome, SyncReport, RESET_RETRIES};
use super::recovery::RecoveryController;
use super::resource::ResourceKey;
use super::status::{IacChange, RepoSyncState, ResourceSyncStatus};
use super::sync_scheduler::SyncScheduler;

/// Calls the cluster watcher makes into the engine.
#[async_trait]
pub trait IacHandle: Send + Sync {
    /// False for resources the policy ignores.
    fn should_watch(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool;

    async fn write_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<DriftOutcome>;

    async fn delete_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DriftOutcome>;

    async fn sync_now(&self) -> Result<SyncOutcome>;

    async fn apply_repo_state(&self) -> Result<SyncReport>;
}

/// Everything a status endpoint needs in one serializable value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IacStatusSnapshot {
    pub policy: PolicySummary,
    pub repo: RepoSyncState,
    pub resources: Vec<ResourceSyncStatus>,
    pub pending_changes: Vec<ChangedFile>,
}

struct RunningScheduler {
    scheduler: SyncScheduler,
    handle: JoinHandle<()>,
}

pub struct IacManager {
    ctx: Arc<IacContext>,
    drift: DriftHandler,
    reconciler: Arc<Reconciler>,
    trigger: broadcast::Sender<()>,
    scheduler: Mutex<Option<RunningScheduler>>,
}

impl IacManager {
    pub fn new(
        policy: SyncPolicy,
        author: impl Into<String>,
        git: Arc<dyn GitBackend>,
        cluster: Arc<dyn ClusterClient>,
        cipher: Option<Arc<SecretCipher>>,
    ) -> Self {
        let normalizer = Normalizer::new(cipher);
        if policy.is_enabled() && !normalizer.has_cipher() {
            log::warn!("No secret key configured, Secret values are stored as-is");
        }
        let ctx = Arc::new(IacContext::new(policy, author, git, cluster, normalizer));
        let (trigger, _) = broadcast::channel(16);

        Self {
            drift: DriftHandler::new(Arc::clone(&ctx)),
            reconciler: Arc::new(Reconciler::new(Arc::clone(&ctx))),
            ctx,
            trigger,
            scheduler: Mutex::new(None),
        }
    }

    /// Builds the manager with a CLI-backed git working copy at `data_path`.
    pub fn from_config(
        config: &AgentConfig,
        cluster: Arc<dyn ClusterClient>,
    ) -> std::result::Result<Self, GitVaultError> {
        let policy = SyncPolicy::from_config(config)?;
        let cipher = SecretCipher::from_sources(
            config.secrets.key_hex.as_deref(),
            config.secrets.key_file.as_deref(),
            config.secrets.key_env_var.as_deref(),
        )?
        .map(Arc::new);

        let identity = GitIdentity {
            user_name: config.git.user_name.clone(),
            user_email: config.git.user_email.clone(),
        };
        let author = identity.user_name.clone();
        let git = Arc::new(GitRepository::new(
            &config.data_path,
            policy.repo_branch.clone(),
            identity,
            policy.repo_pat.clone(),
        ));

        Ok(Self::new(policy, author, git, cluster, cipher))
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.ctx.policy
    }

    /// Prepares the working copy and starts the periodic loop on `runtime`.
    ///
    /// With pull and push both off the working copy is reset and no loop runs.
    pub async fn start(&self, runtime: Handle) -> Result<()> {
        let policy = &self.ctx.policy;
        log::info!(
            "Starting IaC sync (pull: {}, push: {}, every {}s)",
            policy.allow_pull,
            policy.allow_push,
            policy.sync_frequency.as_secs()
        );

        if !policy.is_enabled() {
            log::info!("IaC sync disabled, resetting the local repository");
            return self.reset_working_copy().await;
        }

        let git = &self.ctx.git;
        if !git.is_git_repo() || !git.has_remotes()? {
            if let Err(e) = self.reset_working_copy().await {
                log::error!("Initial repository setup failed, retrying on sync: {}", e);
            }
        } else if policy.has_repo_url() {
            git.set_remote(&policy.repo_url)?;
        }

        let mut slot = self.scheduler_slot();
        if slot.is_some() {
            log::debug!("Sync scheduler already running");
            return Ok(());
        }
        let scheduler = SyncScheduler::new(Arc::clone(&self.reconciler), policy.sync_frequency);
        let handle = scheduler.start(runtime, self.trigger.subscribe());
        *slot = Some(RunningScheduler { scheduler, handle });
        Ok(())
    }

    /// Stops the loop. Returns the scheduler thread for callers that want to
    /// wait for the current run to finish.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let running = self.scheduler_slot().take()?;
        running.scheduler.stop();
        // Wakes the loop so it sees the shutdown.
        let _ = self.trigger.send(());
        Some(running.handle)
    }

    /// Requests an immediate sync from the running loop.
    pub fn trigger_sync(&self) {
        if self.trigger.send(()).is_err() {
            log::debug!("Sync trigger dropped: scheduler not running");
        }
    }

    fn scheduler_slot(&self) -> std::sync::MutexGuard<'_, Option<RunningScheduler>> {
        match self.scheduler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Scheduler lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn reset_working_copy(&self) -> Result<()> {
        RecoveryController::new(Arc::clone(&self.ctx))
            .reset(RESET_RETRIES)
            .await
    }

    pub async fn reset_repository(&self) -> Result<()> {
        self.reconciler.reset_repository().await
    }

    pub async fn reset_file_to_commit(&self, relative_path: &str, commit: &str) -> Result<()> {
        self.reconciler
            .reset_file_to_commit(relative_path, commit)
            .await
    }

    pub fn check_repo_access(&self) -> Result<()> {
        self.reconciler.check_repo_access()
    }

    // ------------------------------------------------------------------
    // Status views
    // ------------------------------------------------------------------

    pub fn repo_state(&self) -> RepoSyncState {
        self.ctx.status.repo_state()
    }

    pub fn resource_status(&self, key: &ResourceKey) -> Option<ResourceSyncStatus> {
        self.ctx.status.resource_status(key)
    }

    pub fn resource_statuses(&self) -> Vec<ResourceSyncStatus> {
        self.ctx.status.resource_statuses()
    }

    pub fn pending_changes(&self) -> Vec<ChangedFile> {
        self.ctx.queue.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IacChange> {
        self.ctx.status.subscribe()
    }

    pub fn status_snapshot(&self) -> IacStatusSnapshot {
        IacStatusSnapshot {
            policy: self.ctx.policy.summary(),
            repo: self.repo_state(),
            resources: self.resource_statuses(),
            pending_changes: self.pending_changes(),
        }
    }

    pub fn status_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.status_snapshot())
    }
}

#[async_trait]
impl IacHandle for IacManager {
    fn should_watch(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool {
        self.drift.should_watch(kind, namespace, name)
    }

    async fn write_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<DriftOutcome> {
        self.drift
            .write_resource(kind, namespace, name, object)
            .await
    }

    async fn delete_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DriftOutcome> {
        self.drift.delete_resource(kind, namespace, name).await
    }

    async fn sync_now(&self) -> Result<SyncOutcome> {
        self.reconciler.sync_now().await
    }

    async fn apply_repo_state(&self) -> Result<SyncReport> {
        self.reconciler.apply_repo_state().await
    }
}
