mod error;
mod logging;
mod watcher;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use gitvault::config::{apply_env_overrides, validate_config};
use gitvault::{load_config, AgentConfig, IacHandle, IacManager, KubeCluster};
use tokio::runtime::Handle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;

use crate::error::{AgentError, Result};

const ENV_CONFIG_PATH: &str = "GITVAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/gitvault/config.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("gitvault-agent failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = read_config()?;

    let client = kube::Client::try_default().await?;
    let cluster = Arc::new(KubeCluster::new(client));
    let manager = Arc::new(IacManager::from_config(&config, cluster.clone())?);

    manager
        .start(Handle::current())
        .await
        .map_err(gitvault::GitVaultError::from)?;

    let mut changes = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => log::debug!("IaC change: {:?}", change),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Skipped {} IaC change notifications", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let watchers = if manager.policy().is_enabled() {
        let handle: Arc<dyn IacHandle> = manager.clone();
        watcher::spawn_watchers(&cluster, &config.iac.workloads, handle).await
    } else {
        Vec::new()
    };

    wait_for_shutdown().await?;
    log::info!("Shutting down");

    for task in watchers {
        task.abort();
    }
    if let Some(scheduler) = manager.stop() {
        let joined = tokio::task::spawn_blocking(move || scheduler.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            log::warn!("Sync scheduler did not shut down cleanly");
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, whichever comes first.
async fn wait_for_shutdown() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).map_err(AgentError::Signal)?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(AgentError::Signal),
        _ = terminate.recv() => Ok(()),
    }
}

/// Reads the config file named on the command line or in `GITVAULT_CONFIG`.
/// Without a file the defaults plus environment overrides are used.
fn read_config() -> Result<AgentConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if path.exists() {
        log::info!("Loading config from {}", path.display());
        return Ok(load_config(&path).map_err(gitvault::GitVaultError::from)?);
    }

    log::info!("No config file at {}, using environment", path.display());
    let mut config = AgentConfig::default();
    apply_env_overrides(&mut config).map_err(gitvault::GitVaultError::from)?;
    validate_config(&config).map_err(gitvault::GitVaultError::from)?;
    Ok(config)
}
