//! Pure data types for git operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A commit as seen by the reconciliation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Full commit hash.
    pub hash: String,
    /// Subject and body of the commit message.
    pub message: String,
    /// Author name.
    pub author: String,
    /// Author date, ISO 8601.
    pub date: String,
    /// When the loop finished applying this commit to the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

/// Repository files touched between two commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedPaths {
    /// Added or modified paths, relative to the repository root.
    pub updated: Vec<String>,
    /// Deleted paths, relative to the repository root.
    pub deleted: Vec<String>,
}

impl ChangedPaths {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Keeps only resource manifests.
    pub fn yaml_only(self) -> Self {
        let is_yaml = |p: &String| p.ends_with(".yaml") || p.ends_with(".yml");
        Self {
            updated: self.updated.into_iter().filter(is_yaml).collect(),
            deleted: self.deleted.into_iter().filter(is_yaml).collect(),
        }
    }
}

/// Someone who committed to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub name: String,
    pub email: String,
    /// Date of the contributor's most recent commit, ISO 8601.
    pub last_activity: String,
}
