//! Runtime sync policy derived from the agent config.

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::Serialize;

use crate::config::schema::AgentConfig;
use crate::error::ConfigError;
use crate::gitops::resource::ResourceKey;
use crate::secrets::resolve_secret_optional;

/// Immutable sync policy for the lifetime of an IaC manager.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub allow_pull: bool,
    pub allow_push: bool,
    pub repo_url: String,
    pub repo_pat: Option<SecretString>,
    pub repo_branch: String,
    pub sync_frequency: Duration,
    pub ignored_namespaces: BTreeSet<String>,
    pub ignored_names: Vec<Regex>,
    pub show_diff_in_log: bool,
    pub log_changes: bool,
}

impl SyncPolicy {
    /// Resolves the token and compiles the ignore patterns.
    ///
    /// The agent's own namespace is always added to the ignored set.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        let iac = &config.iac;

        let repo_pat = resolve_secret_optional(
            iac.repo_pat.as_deref(),
            iac.repo_pat_file.as_deref(),
            iac.repo_pat_env_var.as_deref(),
        )?;

        let ignored_names = iac
            .ignored_names
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut ignored_namespaces: BTreeSet<String> =
            iac.ignored_namespaces.iter().cloned().collect();
        if let Some(own) = config.own_namespace.as_ref().filter(|ns| !ns.is_empty()) {
            ignored_namespaces.insert(own.clone());
        }

        Ok(Self {
            allow_pull: iac.allow_pull,
            allow_push: iac.allow_push,
            repo_url: iac.repo_url.trim().to_string(),
            repo_pat,
            repo_branch: iac.repo_branch.clone(),
            sync_frequency: Duration::from_secs(iac.sync_frequency_secs.max(1)),
            ignored_namespaces,
            ignored_names,
            show_diff_in_log: iac.show_diff_in_log,
            log_changes: iac.log_changes,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.allow_pull || self.allow_push
    }

    /// Cluster drift is reverted instead of committed.
    pub fn is_pull_only(&self) -> bool {
        self.allow_pull && !self.allow_push
    }

    pub fn has_repo_url(&self) -> bool {
        !self.repo_url.is_empty()
    }

    pub fn is_namespace_ignored(&self, namespace: Option<&str>) -> bool {
        namespace.is_some_and(|ns| self.ignored_namespaces.contains(ns))
    }

    /// Matches the ignore patterns against a repo-relative path.
    pub fn is_path_ignored(&self, relative_path: &str) -> bool {
        self.ignored_names.iter().any(|re| re.is_match(relative_path))
    }

    /// The resource lives in an ignored namespace or is that namespace.
    pub fn is_in_ignored_namespace(&self, key: &ResourceKey) -> bool {
        self.is_namespace_ignored(key.namespace.as_deref())
            || key.is_namespace() && self.is_namespace_ignored(Some(&key.name))
    }

    /// Never synced in either direction.
    pub fn is_key_ignored(&self, key: &ResourceKey) -> bool {
        self.is_in_ignored_namespace(key) || self.is_path_ignored(&key.relative_path())
    }

    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            allow_pull: self.allow_pull,
            allow_push: self.allow_push,
            repo_url: crate::gitops::git::auth::redact_url(&self.repo_url),
            has_repo_pat: self.repo_pat.is_some(),
            repo_branch: self.repo_branch.clone(),
            sync_frequency_secs: self.sync_frequency.as_secs(),
            ignored_namespaces: self.ignored_namespaces.iter().cloned().collect(),
            ignored_names: self
                .ignored_names
                .iter()
                .map(|re| re.as_str().to_string())
                .collect(),
            show_diff_in_log: self.show_diff_in_log,
            log_changes: self.log_changes,
        }
    }
}

/// Serializable view of the policy. The token is never included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub allow_pull: bool,
    pub allow_push: bool,
    pub repo_url: String,
    pub has_repo_pat: bool,
    pub repo_branch: String,
    pub sync_frequency_secs: u64,
    pub ignored_namespaces: Vec<String>,
    pub ignored_names: Vec<String>,
    pub show_diff_in_log: bool,
    pub log_changes: bool,
}
