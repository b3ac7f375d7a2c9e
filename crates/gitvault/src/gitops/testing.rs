//! Test fixtures shared by the gitops unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cluster::{ClusterClient, ClusterError, Result};
use crate::config::SyncPolicy;
use crate::secrets::SecretCipher;

use super::context::IacContext;
use super::git::{GitIdentity, GitRepository};
use super::normalize::Normalizer;
use super::resource::ResourceKey;

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub fn policy(allow_pull: bool, allow_push: bool) -> SyncPolicy {
    SyncPolicy {
        allow_pull,
        allow_push,
        repo_url: String::new(),
        repo_pat: None,
        repo_branch: "main".to_string(),
        sync_frequency: Duration::from_secs(10),
        ignored_namespaces: BTreeSet::from(["gitvault".to_string()]),
        ignored_names: Vec::new(),
        show_diff_in_log: true,
        log_changes: true,
    }
}

pub fn disabled_policy() -> SyncPolicy {
    policy(false, false)
}

/// Cluster keeping objects in memory.
#[derive(Default)]
pub struct MemoryCluster {
    pub objects: Mutex<BTreeMap<ResourceKey, Value>>,
    pub calls: Mutex<Vec<String>>,
}

impl MemoryCluster {
    pub fn insert(&self, key: &ResourceKey, object: Value) {
        self.objects.lock().unwrap().insert(key.clone(), object);
    }

    pub fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, verb: &str, key: &ResourceKey) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, key.relative_path()));
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(&self, key: &ResourceKey) -> Result<Value> {
        self.object(key)
            .ok_or_else(|| ClusterError::NotFound(key.relative_path()))
    }

    async fn create(&self, key: &ResourceKey, manifest: &Value) -> Result<()> {
        self.record("create", key);
        self.insert(key, manifest.clone());
        Ok(())
    }

    async fn replace(&self, key: &ResourceKey, manifest: &Value) -> Result<()> {
        self.record("replace", key);
        self.insert(key, manifest.clone());
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.record("delete", key);
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(key.relative_path()))
    }
}

pub fn cipher() -> Arc<SecretCipher> {
    Arc::new(SecretCipher::from_hex_key(TEST_KEY).unwrap())
}

/// Context over a git working copy at `path` and an empty memory cluster.
pub fn context_at(path: &Path, policy: SyncPolicy) -> IacContext {
    context_with(path, policy, Arc::new(MemoryCluster::default()), None)
}

pub fn context_with(
    path: &Path,
    policy: SyncPolicy,
    cluster: Arc<MemoryCluster>,
    cipher: Option<Arc<SecretCipher>>,
) -> IacContext {
    let git = GitRepository::new(path, "main", GitIdentity::default(), None);
    IacContext::new(
        policy,
        "gitvault",
        Arc::new(git),
        cluster,
        Normalizer::new(cipher),
    )
}

pub fn config_map(namespace: &str, name: &str, value: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "17",
            "uid": "6b1f2c",
        },
        "data": { "key": value },
    })
}
