//! Keeps a Kubernetes cluster and a git repository of its manifests in sync.

pub mod cluster;
pub mod config;
pub mod error;
pub mod gitops;
pub mod secrets;

pub use cluster::{ClusterClient, ClusterError, KubeCluster};
pub use config::{load_config, AgentConfig, SyncPolicy};
pub use error::{ConfigError, GitVaultError, Result};
pub use gitops::{GitOpsError, IacHandle, IacManager};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretCipher, SecretError};
