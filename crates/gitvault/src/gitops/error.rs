//! GitOps-specific error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::secrets::SecretError;

/// Errors that can occur while reconciling the cluster with the repository.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Invalid resource path: {0}")]
    InvalidPath(String),

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git merge conflict: {0}")]
    GitMergeConflict(String),

    #[error("Git history diverged from remote: {0}")]
    GitNonFastForward(String),

    #[error("Remote branch does not exist yet: {0}")]
    GitEmptyRemote(String),

    #[error("Git repository not initialized")]
    GitNotInitialized,

    #[error("No git remote configured")]
    GitNoRemote,

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Repository URL and token are required")]
    MissingCredentials,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

impl From<serde_yaml::Error> for GitOpsError {
    fn from(err: serde_yaml::Error) -> Self {
        GitOpsError::ParseYaml {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true if the error is likely transient and the next tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GitOpsError::GitNetworkError(_))
    }

    /// Local history can no longer be reconciled with the remote.
    pub fn is_diverged(&self) -> bool {
        matches!(
            self,
            GitOpsError::GitNonFastForward(_) | GitOpsError::GitMergeConflict(_)
        )
    }

    /// The local working copy has to be rebuilt before syncing can continue.
    pub fn needs_reset(&self) -> bool {
        self.is_diverged()
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("couldn't find remote ref")
        || lower.contains("does not appear to have any commits")
        || lower.contains("remote branch") && lower.contains("not found")
    {
        return GitOpsError::GitEmptyRemote(message);
    }

    if lower.contains("non-fast-forward")
        || lower.contains("not possible to fast-forward")
        || lower.contains("fetch first")
        || lower.contains("diverging branches")
        || lower.contains("[rejected]")
    {
        return GitOpsError::GitNonFastForward(message);
    }

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(message);
    }

    if lower.contains("merge conflict")
        || lower.contains("conflict") && lower.contains("merge")
        || lower.contains("would be overwritten by merge")
    {
        return GitOpsError::GitMergeConflict(message);
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitOpsError::GitAuthFailed(message);
    }

    GitOpsError::GitOperation(message)
}

/// Result type for GitOps operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;
