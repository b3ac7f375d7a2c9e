//! Cluster access used by the applier.

pub mod kubernetes;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::gitops::resource::ResourceKey;

pub use kubernetes::KubeCluster;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Kubernetes API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Create/replace/delete of single resources, manifests as JSON values.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches the live object. `NotFound` when it does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Value>;

    async fn create(&self, key: &ResourceKey, manifest: &Value) -> Result<()>;

    /// Replaces the object; the manifest carries the live `resourceVersion`.
    async fn replace(&self, key: &ResourceKey, manifest: &Value) -> Result<()>;

    async fn delete(&self, key: &ResourceKey) -> Result<()>;
}
