use std::path::{Path, PathBuf};

use crate::config::schema::AgentConfig;
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

pub const ENV_REPO_URL: &str = "GITVAULT_REPO_URL";
pub const ENV_REPO_PAT: &str = "GITVAULT_REPO_PAT";
pub const ENV_REPO_BRANCH: &str = "GITVAULT_REPO_BRANCH";
pub const ENV_SYNC_FREQUENCY: &str = "GITVAULT_SYNC_FREQUENCY_SECS";
pub const ENV_ALLOW_PUSH: &str = "GITVAULT_ALLOW_PUSH";
pub const ENV_ALLOW_PULL: &str = "GITVAULT_ALLOW_PULL";
pub const ENV_DATA_PATH: &str = "GITVAULT_DATA_PATH";
pub const ENV_OWN_NAMESPACE: &str = "GITVAULT_OWN_NAMESPACE";

/// Loads the agent config from a YAML file, then applies env overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Parses and validates a config without looking at the environment.
pub fn load_config_from_str(content: &str) -> Result<AgentConfig, ConfigError> {
    let config = parse_config(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<AgentConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(AgentConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Applies `GITVAULT_*` environment variables on top of the file config.
pub fn apply_env_overrides(config: &mut AgentConfig) -> Result<(), ConfigError> {
    if let Some(url) = env_value(ENV_REPO_URL) {
        config.iac.repo_url = url;
    }
    if let Some(pat) = env_value(ENV_REPO_PAT) {
        config.iac.repo_pat = Some(pat);
    }
    if let Some(branch) = env_value(ENV_REPO_BRANCH) {
        config.iac.repo_branch = branch;
    }
    if let Some(raw) = env_value(ENV_SYNC_FREQUENCY) {
        config.iac.sync_frequency_secs =
            raw.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                name: ENV_SYNC_FREQUENCY.to_string(),
                value: raw.clone(),
            })?;
    }
    if let Some(raw) = env_value(ENV_ALLOW_PUSH) {
        config.iac.allow_push = parse_bool(ENV_ALLOW_PUSH, &raw)?;
    }
    if let Some(raw) = env_value(ENV_ALLOW_PULL) {
        config.iac.allow_pull = parse_bool(ENV_ALLOW_PULL, &raw)?;
    }
    if let Some(path) = env_value(ENV_DATA_PATH) {
        config.data_path = PathBuf::from(path);
    }
    if let Some(namespace) = env_value(ENV_OWN_NAMESPACE) {
        config.own_namespace = Some(namespace);
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

pub fn validate_config(config: &AgentConfig) -> Result<(), ConfigError> {
    let iac = &config.iac;

    if iac.sync_frequency_secs == 0 {
        return Err(ConfigError::Validation {
            message: "syncFrequencySecs must be greater than zero".to_string(),
        });
    }

    if iac.repo_branch.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "repoBranch must not be empty".to_string(),
        });
    }

    for pattern in &iac.ignored_names {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    if iac.allow_push || iac.allow_pull {
        if iac.repo_url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "repoUrl is required when allowPush or allowPull is set".to_string(),
            });
        }

        if iac.allow_push
            && !has_secret_source(
                iac.repo_pat.as_deref(),
                iac.repo_pat_file.as_deref(),
                iac.repo_pat_env_var.as_deref(),
            )
        {
            return Err(ConfigError::Validation {
                message: "repoPat, repoPatFile or repoPatEnvVar is required when allowPush is set"
                    .to_string(),
            });
        }
    }

    for workload in &iac.workloads {
        if workload.resource.is_empty() || workload.version.is_empty() {
            return Err(ConfigError::Validation {
                message: format!(
                    "workload entries need a version and resource (got '{}/{}')",
                    workload.version, workload.resource
                ),
            });
        }
    }

    Ok(())
}
