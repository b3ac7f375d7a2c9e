//! Pending changes waiting for the next push.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resource::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Modify,
    Delete,
}

/// One file mutation made by the drift handler or the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    /// Enqueue order, unique per queue.
    pub seq: u64,
    pub author: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Repository-relative path.
    pub path: String,
    pub message: String,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    next_seq: u64,
    entries: Vec<ChangedFile>,
}

/// Thread-safe queue of file changes.
///
/// A later entry for a path with the other change type supersedes the
/// earlier ones; entries with the same change type accumulate, so each
/// message ends up in the commit.
#[derive(Debug, Default)]
pub struct PendingChangeQueue {
    inner: Mutex<QueueInner>,
}

impl PendingChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Pending change queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Appends a change and returns its sequence number.
    pub fn enqueue(
        &self,
        key: &ResourceKey,
        change_type: ChangeType,
        message: impl Into<String>,
        author: &str,
    ) -> u64 {
        let path = key.relative_path();
        let mut inner = self.lock();

        inner
            .entries
            .retain(|entry| entry.path != path || entry.change_type == change_type);

        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.entries.push(ChangedFile {
            seq,
            author: author.to_string(),
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            path,
            message: message.into(),
            change_type,
            timestamp: Utc::now(),
        });
        seq
    }

    /// Copy of the current entries in enqueue order.
    pub fn snapshot(&self) -> Vec<ChangedFile> {
        self.lock().entries.clone()
    }

    /// Removes the entries of a pushed snapshot. Entries added since stay.
    pub fn remove_pushed(&self, pushed: &[ChangedFile]) {
        let Some(last_seq) = pushed.iter().map(|entry| entry.seq).max() else {
            return;
        };
        self.lock().entries.retain(|entry| entry.seq > last_seq);
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

/// Distinct paths of a snapshot, first occurrence order.
pub fn unique_paths(entries: &[ChangedFile]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .filter(|entry| seen.insert(entry.path.as_str()))
        .map(|entry| entry.path.clone())
        .collect()
}

/// Commit message for a batch: every entry's message on its own line.
pub fn commit_message(entries: &[ChangedFile]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}\n", entry.message))
        .collect()
}
