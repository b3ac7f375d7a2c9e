use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Working copy of the IaC repository.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Namespace the agent itself runs in; never synced.
    #[serde(default)]
    pub own_namespace: Option<String>,
    #[serde(default)]
    pub git: GitIdentityConfig,
    #[serde(default)]
    pub iac: IacConfig,
    #[serde(default)]
    pub secrets: SecretKeyConfig,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("/var/lib/gitvault/repo")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            own_namespace: None,
            git: GitIdentityConfig::default(),
            iac: IacConfig::default(),
            secrets: SecretKeyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitIdentityConfig {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_user_email")]
    pub user_email: String,
}

fn default_user_name() -> String {
    "gitvault".to_string()
}

fn default_user_email() -> String {
    "gitvault@localhost".to_string()
}

impl Default for GitIdentityConfig {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            user_email: default_user_email(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IacConfig {
    #[serde(default)]
    pub repo_url: String,
    /// Personal access token, inline. Prefer `repoPatFile` or `repoPatEnvVar`.
    #[serde(default, skip_serializing)]
    pub repo_pat: Option<String>,
    #[serde(default)]
    pub repo_pat_file: Option<String>,
    #[serde(default)]
    pub repo_pat_env_var: Option<String>,
    #[serde(default = "default_branch")]
    pub repo_branch: String,
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency_secs: u64,
    #[serde(default)]
    pub allow_push: bool,
    #[serde(default)]
    pub allow_pull: bool,
    #[serde(default)]
    pub show_diff_in_log: bool,
    #[serde(default)]
    pub ignored_namespaces: Vec<String>,
    /// Regexes matched against `<kind>/<namespace>/<name>.yaml`.
    #[serde(default)]
    pub ignored_names: Vec<String>,
    #[serde(default)]
    pub log_changes: bool,
    #[serde(default = "default_workloads")]
    pub workloads: Vec<WorkloadSelector>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_sync_frequency() -> u64 {
    10
}

impl Default for IacConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            repo_pat: None,
            repo_pat_file: None,
            repo_pat_env_var: None,
            repo_branch: default_branch(),
            sync_frequency_secs: default_sync_frequency(),
            allow_push: false,
            allow_pull: false,
            show_diff_in_log: false,
            ignored_namespaces: Vec::new(),
            ignored_names: Vec::new(),
            log_changes: false,
            workloads: default_workloads(),
        }
    }
}

/// A watched resource type, addressed like an API path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// Lower-case plural resource name, e.g. `deployments`.
    pub resource: String,
}

impl WorkloadSelector {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }
}

fn default_workloads() -> Vec<WorkloadSelector> {
    vec![
        WorkloadSelector::new("", "v1", "namespaces"),
        WorkloadSelector::new("", "v1", "configmaps"),
        WorkloadSelector::new("", "v1", "secrets"),
        WorkloadSelector::new("", "v1", "services"),
        WorkloadSelector::new("", "v1", "serviceaccounts"),
        WorkloadSelector::new("", "v1", "persistentvolumeclaims"),
        WorkloadSelector::new("apps", "v1", "deployments"),
        WorkloadSelector::new("apps", "v1", "statefulsets"),
        WorkloadSelector::new("apps", "v1", "daemonsets"),
        WorkloadSelector::new("batch", "v1", "cronjobs"),
        WorkloadSelector::new("networking.k8s.io", "v1", "ingresses"),
    ]
}

/// Key used to encrypt Secret values before they are committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyConfig {
    #[serde(default, skip_serializing)]
    pub key_hex: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub key_env_var: Option<String>,
}
