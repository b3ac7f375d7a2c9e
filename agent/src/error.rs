use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    GitVault(#[from] gitvault::GitVaultError),

    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
