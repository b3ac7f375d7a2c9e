use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitVaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] crate::gitops::GitOpsError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] crate::cluster::ClusterError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid value for environment variable '{name}': {value}")]
    InvalidEnvOverride { name: String, value: String },

    #[error("Failed to resolve repository token: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

pub type Result<T> = std::result::Result<T, GitVaultError>;
