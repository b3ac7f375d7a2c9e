//! Repository and per-resource sync status.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::git::types::{CommitInfo, Contributor};
use super::resource::ResourceKey;

/// State of the reconciliation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    /// Last run failed; the next tick retries.
    FailedRecoverable,
    /// Last run hit a diverged history; the local clone was reset.
    FailedUnrecoverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Synced,
    PendingSync,
    SyncError,
    Deleted,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSyncStatus {
    pub key: ResourceKey,
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSyncState {
    pub repo_error: Option<String>,
    pub remote_error: Option<String>,
    pub pull_error: Option<String>,
    pub push_error: Option<String>,
    pub sync_error: Option<String>,
    pub last_applied_commit: Option<CommitInfo>,
    pub last_push: Option<CommitInfo>,
    pub last_sync_duration_ms: Option<u64>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub loop_state: LoopState,
    pub pulse: BTreeMap<String, u32>,
    pub contributors: Vec<Contributor>,
    pub number_of_files: usize,
    pub recently_added_or_updated_files: Vec<String>,
    pub recently_deleted_files: Vec<String>,
}

/// Change notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IacChange {
    RepoError { error: Option<String> },
    RemoteError { error: Option<String> },
    PullError { error: Option<String> },
    PushError { error: Option<String> },
    SyncError { error: Option<String> },
    LoopStateChanged { state: LoopState },
    ResourceUpdated { status: ResourceSyncStatus },
    LastPullUpdated { commit: CommitInfo },
    LastPushUpdated { commit: CommitInfo },
    Reset,
}

/// Which error slot of [`RepoSyncState`] to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSlot {
    Repo,
    Remote,
    Pull,
    Push,
    Sync,
}

/// Owns all sync status and notifies subscribers about changes.
pub struct StatusTracker {
    repo: RwLock<RepoSyncState>,
    resources: RwLock<BTreeMap<ResourceKey, ResourceSyncStatus>>,
    sender: broadcast::Sender<IacChange>,
}

impl StatusTracker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            repo: RwLock::new(RepoSyncState::default()),
            resources: RwLock::new(BTreeMap::new()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IacChange> {
        self.sender.subscribe()
    }

    fn notify(&self, change: IacChange) {
        // No active receivers is fine.
        let _ = self.sender.send(change);
    }

    fn repo_read(&self) -> RwLockReadGuard<'_, RepoSyncState> {
        self.repo.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn repo_write(&self) -> RwLockWriteGuard<'_, RepoSyncState> {
        self.repo.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resources_write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResourceKey, ResourceSyncStatus>> {
        self.resources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Resource status
    // ------------------------------------------------------------------

    pub fn set_resource_state(&self, key: &ResourceKey, state: SyncState) {
        self.update_resource(key, state, None);
    }

    pub fn set_resource_error(&self, key: &ResourceKey, error: impl ToString) {
        self.update_resource(key, SyncState::SyncError, Some(error.to_string()));
    }

    fn update_resource(&self, key: &ResourceKey, state: SyncState, error: Option<String>) {
        let status = ResourceSyncStatus {
            key: key.clone(),
            state,
            error,
            updated_at: Utc::now(),
        };
        self.resources_write().insert(key.clone(), status.clone());
        self.notify(IacChange::ResourceUpdated { status });
    }

    pub fn resource_status(&self, key: &ResourceKey) -> Option<ResourceSyncStatus> {
        self.resources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn resource_statuses(&self) -> Vec<ResourceSyncStatus> {
        self.resources
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Repository state
    // ------------------------------------------------------------------

    pub fn repo_state(&self) -> RepoSyncState {
        self.repo_read().clone()
    }

    /// Sets one error slot; subscribers hear about it only if it changed.
    pub fn set_error(&self, slot: ErrorSlot, error: Option<String>) {
        let changed = {
            let mut repo = self.repo_write();
            let field = match slot {
                ErrorSlot::Repo => &mut repo.repo_error,
                ErrorSlot::Remote => &mut repo.remote_error,
                ErrorSlot::Pull => &mut repo.pull_error,
                ErrorSlot::Push => &mut repo.push_error,
                ErrorSlot::Sync => &mut repo.sync_error,
            };
            if *field == error {
                false
            } else {
                *field = error.clone();
                true
            }
        };

        if changed {
            self.notify(match slot {
                ErrorSlot::Repo => IacChange::RepoError { error },
                ErrorSlot::Remote => IacChange::RemoteError { error },
                ErrorSlot::Pull => IacChange::PullError { error },
                ErrorSlot::Push => IacChange::PushError { error },
                ErrorSlot::Sync => IacChange::SyncError { error },
            });
        }
    }

    pub fn set_loop_state(&self, state: LoopState) {
        let changed = {
            let mut repo = self.repo_write();
            std::mem::replace(&mut repo.loop_state, state) != state
        };
        if changed {
            self.notify(IacChange::LoopStateChanged { state });
        }
    }

    pub fn last_applied_hash(&self) -> Option<String> {
        self.repo_read()
            .last_applied_commit
            .as_ref()
            .map(|commit| commit.hash.clone())
    }

    pub fn set_last_applied(&self, mut commit: CommitInfo) {
        commit.applied_at = Some(Utc::now());
        self.repo_write().last_applied_commit = Some(commit.clone());
        self.notify(IacChange::LastPullUpdated { commit });
    }

    pub fn set_last_push(&self, commit: CommitInfo) {
        self.repo_write().last_push = Some(commit.clone());
        self.notify(IacChange::LastPushUpdated { commit });
    }

    pub fn set_recent_files(&self, updated: Vec<String>, deleted: Vec<String>) {
        let mut repo = self.repo_write();
        repo.recently_added_or_updated_files = updated;
        repo.recently_deleted_files = deleted;
    }

    pub fn set_repo_stats(
        &self,
        pulse: BTreeMap<String, u32>,
        contributors: Vec<Contributor>,
        number_of_files: usize,
    ) {
        let mut repo = self.repo_write();
        repo.pulse = pulse;
        repo.contributors = contributors;
        repo.number_of_files = number_of_files;
    }

    pub fn finish_sync(&self, duration_ms: u64) {
        let mut repo = self.repo_write();
        repo.last_sync_duration_ms = Some(duration_ms);
        repo.last_sync_at = Some(Utc::now());
    }

    /// Drops all repository and resource status.
    pub fn reset(&self) {
        *self.repo_write() = RepoSyncState::default();
        self.resources_write().clear();
        self.notify(IacChange::Reset);
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(256)
    }
}
