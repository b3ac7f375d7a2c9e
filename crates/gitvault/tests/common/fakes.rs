//! Test doubles for the cluster and git seams.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use gitvault::cluster::{ClusterClient, ClusterError, Result as ClusterResult};
use gitvault::gitops::git::{ChangedPaths, CommitInfo, Contributor, GitBackend, GitRepository};
use gitvault::gitops::{ResourceKey, Result};

/// In-memory cluster recording every mutating call.
///
/// When gated, `get` blocks until [`FakeCluster::release`] is called.
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceKey, Value>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<ResourceKey>>,
    gated: AtomicBool,
    gate: Semaphore,
    waiting: AtomicUsize,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeSet::new()),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
        }
    }
}

impl FakeCluster {
    pub fn insert(&self, key: &ResourceKey, object: Value) {
        self.objects.lock().unwrap().insert(key.clone(), object);
    }

    pub fn remove(&self, key: &ResourceKey) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Makes every mutation of `key` fail with an API error.
    pub fn fail_on(&self, key: &ResourceKey) {
        self.failing.lock().unwrap().insert(key.clone());
    }

    pub fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    /// Number of `get` calls currently blocked on the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn record(&self, verb: &str, key: &ResourceKey) -> ClusterResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", verb, key.relative_path()));
        if self.failing.lock().unwrap().contains(key) {
            return Err(ClusterError::Api(format!("{} rejected", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, key: &ResourceKey) -> ClusterResult<Value> {
        if self.gated.load(Ordering::SeqCst) {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            if let Ok(permit) = permit {
                permit.forget();
            }
        }
        self.object(key)
            .ok_or_else(|| ClusterError::NotFound(key.relative_path()))
    }

    async fn create(&self, key: &ResourceKey, manifest: &Value) -> ClusterResult<()> {
        self.record("create", key)?;
        self.insert(key, manifest.clone());
        Ok(())
    }

    async fn replace(&self, key: &ResourceKey, manifest: &Value) -> ClusterResult<()> {
        self.record("replace", key)?;
        self.insert(key, manifest.clone());
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> ClusterResult<()> {
        self.record("delete", key)?;
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(key.relative_path()))
    }
}

/// Real git working copy that records which operations were called.
pub struct RecordingGit {
    inner: GitRepository,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingGit {
    pub fn new(inner: GitRepository) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl GitBackend for RecordingGit {
    fn repo_path(&self) -> &Path {
        self.inner.repo_path()
    }

    fn branch(&self) -> &str {
        self.inner.branch()
    }

    fn is_git_repo(&self) -> bool {
        self.record("is_git_repo");
        self.inner.is_git_repo()
    }

    fn init(&self) -> Result<()> {
        self.record("init");
        self.inner.init()
    }

    fn set_remote(&self, url: &str) -> Result<()> {
        self.record("set_remote");
        self.inner.set_remote(url)
    }

    fn has_remotes(&self) -> Result<bool> {
        self.record("has_remotes");
        self.inner.has_remotes()
    }

    fn fetch(&self) -> Result<()> {
        self.record("fetch");
        self.inner.fetch()
    }

    fn checkout_remote_branch(&self) -> Result<()> {
        self.record("checkout_remote_branch");
        self.inner.checkout_remote_branch()
    }

    fn checkout_new_branch(&self) -> Result<()> {
        self.record("checkout_new_branch");
        self.inner.checkout_new_branch()
    }

    fn head_commit(&self) -> Result<Option<CommitInfo>> {
        self.record("head_commit");
        self.inner.head_commit()
    }

    fn pull(&self) -> Result<()> {
        self.record("pull");
        self.inner.pull()
    }

    fn push(&self) -> Result<()> {
        self.record("push");
        self.inner.push()
    }

    fn commit(&self, paths: &[String], message: &str) -> Result<Option<String>> {
        self.record("commit");
        self.inner.commit(paths, message)
    }

    fn commit_empty(&self, message: &str) -> Result<String> {
        self.record("commit_empty");
        self.inner.commit_empty(message)
    }

    fn changed_files(&self, from: Option<&str>, to: &str) -> Result<ChangedPaths> {
        self.record("changed_files");
        self.inner.changed_files(from, to)
    }

    fn contributors(&self) -> Result<Vec<Contributor>> {
        self.record("contributors");
        self.inner.contributors()
    }

    fn pulse(&self, max_days: usize) -> Result<BTreeMap<String, u32>> {
        self.record("pulse");
        self.inner.pulse(max_days)
    }

    fn ls_remote(&self, url: &str) -> Result<()> {
        self.record("ls_remote");
        self.inner.ls_remote(url)
    }

    fn restore_file(&self, commit: &str, path: &str) -> Result<()> {
        self.record("restore_file");
        self.inner.restore_file(commit, path)
    }
}

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name },
    })
}

pub fn config_map(namespace: &str, name: &str, value: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "uid": "0c9b",
        },
        "data": { "key": value },
    })
}

pub fn deployment(namespace: &str, name: &str, replicas: u32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": name, "image": "nginx:1.27" }] },
            },
        },
        "status": { "readyReplicas": replicas },
    })
}

/// Manifest YAML as the engine would write it.
pub fn manifest_yaml(object: &Value) -> String {
    gitvault::gitops::Normalizer::default()
        .to_yaml(object, gitvault::gitops::SecretTreatment::Nothing)
        .unwrap()
}
