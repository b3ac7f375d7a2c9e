//! State shared by the drift handler, the reconciler and recovery.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cluster::ClusterClient;
use crate::config::SyncPolicy;

use super::batch::{ChangeType, PendingChangeQueue};
use super::error::{GitOpsError, Result};
use super::git::GitBackend;
use super::normalize::Normalizer;
use super::resource::ResourceKey;
use super::status::StatusTracker;

pub struct IacContext {
    pub policy: SyncPolicy,
    /// Recorded as the author of queued changes.
    pub author: String,
    pub git: Arc<dyn GitBackend>,
    pub cluster: Arc<dyn ClusterClient>,
    pub normalizer: Normalizer,
    pub status: StatusTracker,
    pub queue: PendingChangeQueue,
    setup_in_progress: AtomicBool,
    initial_apply_done: AtomicBool,
}

impl IacContext {
    pub fn new(
        policy: SyncPolicy,
        author: impl Into<String>,
        git: Arc<dyn GitBackend>,
        cluster: Arc<dyn ClusterClient>,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            policy,
            author: author.into(),
            git,
            cluster,
            normalizer,
            status: StatusTracker::default(),
            queue: PendingChangeQueue::new(),
            setup_in_progress: AtomicBool::new(false),
            initial_apply_done: AtomicBool::new(false),
        }
    }

    pub fn data_path(&self) -> &Path {
        self.git.repo_path()
    }

    pub fn is_setup_in_progress(&self) -> bool {
        self.setup_in_progress.load(Ordering::SeqCst)
    }

    /// Marks the repository as being set up. `None` if a setup already runs.
    pub fn begin_setup(&self) -> Option<SetupGuard<'_>> {
        self.setup_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SetupGuard {
                flag: &self.setup_in_progress,
            })
    }

    pub fn initial_apply_done(&self) -> bool {
        self.initial_apply_done.load(Ordering::SeqCst)
    }

    pub fn mark_initial_apply_done(&self) {
        self.initial_apply_done.store(true, Ordering::SeqCst);
    }

    pub fn reset_initial_apply(&self) {
        self.initial_apply_done.store(false, Ordering::SeqCst);
    }

    /// Content of the committed manifest for `key`, if the file exists.
    pub fn read_committed(&self, key: &ResourceKey) -> Result<Option<String>> {
        let path = key.absolute_path(self.data_path());
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GitOpsError::ReadFile { path, source: e }),
        }
    }

    pub fn write_manifest(&self, key: &ResourceKey, content: &str) -> Result<()> {
        let path = key.absolute_path(self.data_path());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitOpsError::WriteFile {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&path, content).map_err(|e| GitOpsError::WriteFile { path, source: e })
    }

    /// Removes the manifest for `key`. A missing file is not an error.
    pub fn remove_manifest(&self, key: &ResourceKey) -> Result<()> {
        let path = key.absolute_path(self.data_path());
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitOpsError::FileOperation(format!(
                "Failed to remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    /// Queues a change with the message `"<verb> <key>"`.
    pub fn enqueue(&self, key: &ResourceKey, change_type: ChangeType, verb: &str) -> u64 {
        self.enqueue_message(key, change_type, format!("{} {}", verb, key))
    }

    pub fn enqueue_message(
        &self,
        key: &ResourceKey,
        change_type: ChangeType,
        message: String,
    ) -> u64 {
        if self.policy.log_changes {
            log::info!("{}", message);
        }
        self.queue.enqueue(key, change_type, message, &self.author)
    }
}

/// Clears the setup flag when dropped.
pub struct SetupGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
