//! Test harness for isolated reconciliation runs.
//!
//! The `IacHarness` struct provides:
//! - A bare remote plus an upstream clone standing in for other committers
//! - An `IacManager` over a recording git working copy and a fake cluster
//! - Helpers to read what ended up on the remote

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use gitvault::config::SyncPolicy;
use gitvault::gitops::git::{GitBackend, GitIdentity, GitRepository};
use gitvault::gitops::{GitOpsError, IacManager};

use super::fakes::{FakeCluster, RecordingGit};

pub struct IacHarness {
    temp_dir: TempDir,
    pub remote: PathBuf,
    pub work: PathBuf,
    upstream: GitRepository,
    pub git: Arc<RecordingGit>,
    pub cluster: Arc<FakeCluster>,
    pub manager: Arc<IacManager>,
    pub runtime: tokio::runtime::Runtime,
}

pub fn test_policy(allow_pull: bool, allow_push: bool, repo_url: &str) -> SyncPolicy {
    SyncPolicy {
        allow_pull,
        allow_push,
        repo_url: repo_url.to_string(),
        repo_pat: None,
        repo_branch: "main".to_string(),
        sync_frequency: Duration::from_secs(3600),
        ignored_namespaces: BTreeSet::from(["gitvault".to_string()]),
        ignored_names: Vec::new(),
        show_diff_in_log: false,
        log_changes: true,
    }
}

impl IacHarness {
    pub fn new(allow_pull: bool, allow_push: bool) -> Self {
        Self::with_policy(allow_pull, allow_push, |_| {})
    }

    pub fn with_policy(
        allow_pull: bool,
        allow_push: bool,
        customize: impl FnOnce(&mut SyncPolicy),
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remote = temp_dir.path().join("remote.git");
        let output = Command::new("git")
            .args(["init", "--bare", "--quiet"])
            .arg(&remote)
            .output()
            .expect("Failed to run git");
        assert!(output.status.success(), "git init --bare failed");
        let url = remote.to_string_lossy().into_owned();

        let upstream = GitRepository::new(
            temp_dir.path().join("upstream"),
            "main",
            GitIdentity {
                user_name: "alice".to_string(),
                user_email: "alice@example.com".to_string(),
            },
            None,
        );
        upstream.init().unwrap();
        upstream.set_remote(&url).unwrap();

        let work = temp_dir.path().join("work");
        let git = Arc::new(RecordingGit::new(GitRepository::new(
            &work,
            "main",
            GitIdentity::default(),
            None,
        )));
        let cluster = Arc::new(FakeCluster::default());

        let mut policy = test_policy(allow_pull, allow_push, &url);
        customize(&mut policy);

        let manager = Arc::new(IacManager::new(
            policy,
            "gitvault",
            Arc::clone(&git) as Arc<dyn GitBackend>,
            Arc::clone(&cluster) as Arc<dyn gitvault::cluster::ClusterClient>,
            None,
        ));

        Self {
            temp_dir,
            remote,
            work,
            upstream,
            git,
            cluster,
            manager,
            runtime: tokio::runtime::Runtime::new().expect("Failed to create runtime"),
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Clones the remote into the working copy.
    pub fn setup(&self) {
        self.block_on(self.manager.reset_repository())
            .expect("Repository setup failed");
    }

    /// Commits files as another user and pushes them. Returns the commit hash.
    pub fn push_upstream(
        &self,
        files: &[(&str, String)],
        deletions: &[&str],
        message: &str,
    ) -> String {
        match self.upstream.pull() {
            Ok(()) | Err(GitOpsError::GitEmptyRemote(_)) => {}
            Err(e) => panic!("upstream pull failed: {}", e),
        }

        let mut paths = Vec::new();
        for (path, content) in files {
            let full = self.upstream.repo_path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
            paths.push(path.to_string());
        }
        for path in deletions {
            let _ = std::fs::remove_file(self.upstream.repo_path().join(path));
            paths.push(path.to_string());
        }

        let hash = self
            .upstream
            .commit(&paths, message)
            .unwrap()
            .expect("nothing to commit upstream");
        self.upstream.push().unwrap();
        hash
    }

    /// Content of `path` at the remote branch head.
    pub fn remote_file(&self, path: &str) -> Option<String> {
        let spec = format!("main:{}", path);
        let output = self.git_in_remote(&["show", &spec]);
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn remote_head(&self) -> Option<String> {
        let output = self.git_in_remote(&["rev-parse", "--verify", "--quiet", "refs/heads/main"]);
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn remote_head_message(&self) -> String {
        let output = self.git_in_remote(&["log", "-1", "--format=%B", "main"]);
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Commits in the working copy without pushing.
    pub fn commit_locally(&self, path: &str, content: &str, message: &str) {
        let full = self.work.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
        self.git.commit(&[path.to_string()], message).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn git_in_remote(&self, args: &[&str]) -> std::process::Output {
        Command::new("git")
            .current_dir(&self.remote)
            .args(args)
            .output()
            .expect("Failed to run git")
    }
}
