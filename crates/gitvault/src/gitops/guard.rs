//! Policy guard and drift handler for watch events.
//!
//! Every cluster event is first checked against the ignore rules. A change
//! that survives is compared with the committed manifest; depending on the
//! policy the drift is reverted, written to the repository, or left alone.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::applier;
use super::batch::ChangeType;
use super::context::IacContext;
use super::diff::diff_yaml;
use super::error::Result;
use super::normalize::SecretTreatment;
use super::resource::ResourceKey;
use super::status::SyncState;

/// Why an event was not handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    SetupInProgress,
    Disabled,
    InvalidKey,
    IgnoredNamespace,
    IgnoredName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriftOutcome {
    Skipped(SkipReason),
    /// Live state matches the repository.
    InSync,
    /// Committed manifest was re-applied over the drift.
    Reverted,
    /// Live state was written to the repository and queued.
    Written,
    /// Manifest was removed from the repository and queued.
    Removed,
    /// Pull-only and nothing committed to revert to.
    Untracked,
}

pub struct DriftHandler {
    ctx: Arc<IacContext>,
}

impl DriftHandler {
    pub fn new(ctx: Arc<IacContext>) -> Self {
        Self { ctx }
    }

    /// Returns the reason to ignore an event for `key`, if any.
    pub fn skip_reason(&self, key: &ResourceKey) -> Option<SkipReason> {
        let policy = &self.ctx.policy;
        if self.ctx.is_setup_in_progress() {
            Some(SkipReason::SetupInProgress)
        } else if !policy.is_enabled() {
            Some(SkipReason::Disabled)
        } else if !key.is_valid() {
            Some(SkipReason::InvalidKey)
        } else if policy.is_in_ignored_namespace(key) {
            Some(SkipReason::IgnoredNamespace)
        } else if policy.is_path_ignored(&key.relative_path()) {
            Some(SkipReason::IgnoredName)
        } else {
            None
        }
    }

    pub fn should_watch(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool {
        self.skip_reason(&ResourceKey::new(kind, namespace, name))
            .is_none()
    }

    /// Handles an added or modified live object.
    pub async fn write_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<DriftOutcome> {
        let key = ResourceKey::new(kind, namespace, name);
        if let Some(reason) = self.skip_reason(&key) {
            log::trace!("Skipping {}: {:?}", key, reason);
            return Ok(DriftOutcome::Skipped(reason));
        }

        let result = self.handle_write(&key, object).await;
        if let Err(e) = &result {
            log::error!("Failed to handle change of {}: {}", key, e);
            self.ctx.status.set_resource_error(&key, e);
        }
        result
    }

    /// Handles a deleted live object.
    pub async fn delete_resource(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DriftOutcome> {
        let key = ResourceKey::new(kind, namespace, name);
        if let Some(reason) = self.skip_reason(&key) {
            log::trace!("Skipping deletion of {}: {:?}", key, reason);
            return Ok(DriftOutcome::Skipped(reason));
        }

        let result = self.handle_delete(&key).await;
        if let Err(e) = &result {
            log::error!("Failed to handle deletion of {}: {}", key, e);
            self.ctx.status.set_resource_error(&key, e);
        }
        result
    }

    async fn handle_write(&self, key: &ResourceKey, object: &Value) -> Result<DriftOutcome> {
        let ctx = &self.ctx;
        let live = ctx.normalizer.to_yaml(object, SecretTreatment::Nothing)?;
        let committed = match ctx.read_committed(key)? {
            Some(content) => Some(
                ctx.normalizer
                    .yaml_from_str(&content, SecretTreatment::Decrypt)?,
            ),
            None => None,
        };

        let diff = diff_yaml(
            &key.relative_path(),
            committed.as_deref().unwrap_or_default(),
            &live,
        );
        if diff.is_empty() {
            ctx.status.set_resource_state(key, SyncState::Synced);
            return Ok(DriftOutcome::InSync);
        }

        if ctx.policy.show_diff_in_log {
            log::info!("Drift on {}:\n{}", key, diff);
        }

        if ctx.policy.is_pull_only() {
            if committed.is_none() {
                log::debug!("{} is not in the repository, leaving it alone", key);
                return Ok(DriftOutcome::Untracked);
            }
            applier::apply_file(ctx, &key.relative_path()).await?;
            ctx.status.set_resource_state(key, SyncState::Reverted);
            log::info!("Reverted drift on {}", key);
            return Ok(DriftOutcome::Reverted);
        }

        let encrypted = ctx.normalizer.to_yaml(object, SecretTreatment::Encrypt)?;
        ctx.write_manifest(key, &encrypted)?;
        ctx.status.set_resource_state(key, SyncState::PendingSync);
        ctx.enqueue(key, ChangeType::Modify, "Updated");
        Ok(DriftOutcome::Written)
    }

    async fn handle_delete(&self, key: &ResourceKey) -> Result<DriftOutcome> {
        let ctx = &self.ctx;
        if ctx.read_committed(key)?.is_none() {
            ctx.status.set_resource_state(key, SyncState::Deleted);
            return Ok(DriftOutcome::InSync);
        }

        if ctx.policy.show_diff_in_log {
            log::info!("{} was deleted from the cluster", key);
        }

        if ctx.policy.is_pull_only() {
            applier::apply_file(ctx, &key.relative_path()).await?;
            ctx.status.set_resource_state(key, SyncState::Reverted);
            log::info!("Recreated {} from the repository", key);
            return Ok(DriftOutcome::Reverted);
        }

        ctx.remove_manifest(key)?;
        ctx.status.set_resource_state(key, SyncState::Deleted);
        ctx.enqueue(key, ChangeType::Delete, "Deleted");
        Ok(DriftOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::testing::{
        cipher, config_map, context_at, context_with, disabled_policy, policy, MemoryCluster,
    };
    use regex::Regex;
    use serde_json::json;
    use tempfile::TempDir;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Runtime::new().unwrap().block_on(future)
    }

    fn app_key() -> ResourceKey {
        ResourceKey::new("configmaps", Some("web"), "app")
    }

    #[test]
    fn test_new_resource_is_written_and_queued() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let outcome = block_on(handler.write_resource(
            "configmaps",
            Some("web"),
            "app",
            &config_map("web", "app", "v1"),
        ))
        .unwrap();
        assert_eq!(outcome, DriftOutcome::Written);

        let written = std::fs::read_to_string(dir.path().join("configmaps/web/app.yaml")).unwrap();
        assert!(written.contains("key: v1"));
        assert!(!written.contains("resourceVersion"));
        assert!(!written.contains("uid"));

        let queued = ctx.queue.snapshot();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].message, "Updated [configmaps] web/app");
        assert_eq!(queued[0].change_type, ChangeType::Modify);
        assert_eq!(
            ctx.status.resource_status(&app_key()).unwrap().state,
            SyncState::PendingSync
        );
    }

    #[test]
    fn test_unchanged_resource_is_in_sync() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let handler = DriftHandler::new(Arc::clone(&ctx));
        let object = config_map("web", "app", "v1");

        block_on(handler.write_resource("configmaps", Some("web"), "app", &object)).unwrap();

        // Volatile fields changing alone is not drift.
        let mut touched = object.clone();
        touched["metadata"]["resourceVersion"] = json!("18");
        let outcome =
            block_on(handler.write_resource("configmaps", Some("web"), "app", &touched)).unwrap();

        assert_eq!(outcome, DriftOutcome::InSync);
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(
            ctx.status.resource_status(&app_key()).unwrap().state,
            SyncState::Synced
        );
    }

    #[test]
    fn test_ignored_resources_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut policy = policy(true, true);
        policy.ignored_names = vec![Regex::new("^configmaps/.*/kube-root-ca").unwrap()];
        let ctx = Arc::new(context_at(dir.path(), policy));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let outcome = block_on(handler.write_resource(
            "configmaps",
            Some("gitvault"),
            "app",
            &config_map("gitvault", "app", "v1"),
        ))
        .unwrap();
        assert_eq!(outcome, DriftOutcome::Skipped(SkipReason::IgnoredNamespace));

        let outcome = block_on(handler.write_resource(
            "configmaps",
            Some("web"),
            "kube-root-ca.crt",
            &config_map("web", "kube-root-ca.crt", "pem"),
        ))
        .unwrap();
        assert_eq!(outcome, DriftOutcome::Skipped(SkipReason::IgnoredName));

        assert!(!handler.should_watch("namespaces", None, "gitvault"));
        assert!(handler.should_watch("namespaces", None, "web"));
        assert!(ctx.queue.is_empty());
        assert!(ctx.status.resource_statuses().is_empty());
        assert!(!dir.path().join("configmaps").exists());
    }

    #[test]
    fn test_events_skipped_during_setup() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let _setup = ctx.begin_setup().unwrap();
        let outcome =
            block_on(handler.delete_resource("configmaps", Some("web"), "app")).unwrap();
        assert_eq!(outcome, DriftOutcome::Skipped(SkipReason::SetupInProgress));
    }

    #[test]
    fn test_pull_only_reverts_drift() {
        let dir = TempDir::new().unwrap();
        let cluster = Arc::new(MemoryCluster::default());
        let ctx = Arc::new(context_with(
            dir.path(),
            policy(true, false),
            Arc::clone(&cluster),
            None,
        ));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let committed = ctx
            .normalizer
            .to_yaml(&config_map("web", "app", "v1"), SecretTreatment::Nothing)
            .unwrap();
        ctx.write_manifest(&app_key(), &committed).unwrap();

        let drifted = config_map("web", "app", "v2");
        cluster.insert(&app_key(), drifted.clone());

        let outcome =
            block_on(handler.write_resource("configmaps", Some("web"), "app", &drifted)).unwrap();
        assert_eq!(outcome, DriftOutcome::Reverted);

        let live = cluster.object(&app_key()).unwrap();
        assert_eq!(live["data"]["key"], json!("v1"));
        assert_eq!(live["metadata"]["resourceVersion"], json!("17"));
        assert_eq!(cluster.calls(), vec!["replace configmaps/web/app.yaml"]);
        assert!(ctx.queue.is_empty());
        assert_eq!(
            std::fs::read_to_string(app_key().absolute_path(dir.path())).unwrap(),
            committed
        );
        assert_eq!(
            ctx.status.resource_status(&app_key()).unwrap().state,
            SyncState::Reverted
        );
    }

    #[test]
    fn test_pull_only_leaves_untracked_resources() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, false)));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let outcome = block_on(handler.write_resource(
            "configmaps",
            Some("web"),
            "app",
            &config_map("web", "app", "v1"),
        ))
        .unwrap();
        assert_eq!(outcome, DriftOutcome::Untracked);
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_delete_removes_file_and_queues() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        block_on(handler.write_resource(
            "configmaps",
            Some("web"),
            "app",
            &config_map("web", "app", "v1"),
        ))
        .unwrap();

        let outcome =
            block_on(handler.delete_resource("configmaps", Some("web"), "app")).unwrap();
        assert_eq!(outcome, DriftOutcome::Removed);
        assert!(!app_key().absolute_path(dir.path()).exists());

        // The delete supersedes the queued update.
        let queued = ctx.queue.snapshot();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].change_type, ChangeType::Delete);
        assert_eq!(queued[0].message, "Deleted [configmaps] web/app");
        assert_eq!(
            ctx.status.resource_status(&app_key()).unwrap().state,
            SyncState::Deleted
        );
    }

    #[test]
    fn test_delete_of_untracked_resource_queues_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), policy(true, true)));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let outcome =
            block_on(handler.delete_resource("configmaps", Some("web"), "app")).unwrap();
        assert_eq!(outcome, DriftOutcome::InSync);
        assert!(ctx.queue.is_empty());
        assert_eq!(
            ctx.status.resource_status(&app_key()).unwrap().state,
            SyncState::Deleted
        );
    }

    #[test]
    fn test_secret_values_are_encrypted_on_disk() {
        let dir = TempDir::new().unwrap();
        let cipher = cipher();
        let ctx = Arc::new(context_with(
            dir.path(),
            policy(true, true),
            Arc::new(MemoryCluster::default()),
            Some(Arc::clone(&cipher)),
        ));
        let handler = DriftHandler::new(Arc::clone(&ctx));
        let secret = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "db", "namespace": "web" },
            "type": "Opaque",
            "data": { "password": "c2VjcmV0" },
        });

        let outcome =
            block_on(handler.write_resource("secrets", Some("web"), "db", &secret)).unwrap();
        assert_eq!(outcome, DriftOutcome::Written);

        let key = ResourceKey::new("secrets", Some("web"), "db");
        let on_disk = std::fs::read_to_string(key.absolute_path(dir.path())).unwrap();
        assert!(!on_disk.contains("c2VjcmV0"));
        let parsed: Value = serde_yaml::from_str(&on_disk).unwrap();
        let stored = parsed["data"]["password"].as_str().unwrap();
        assert!(cipher.is_encrypted(stored));
        assert_eq!(cipher.decrypt(stored).unwrap(), "c2VjcmV0");

        // Same live object again compares against the decrypted file.
        let outcome =
            block_on(handler.write_resource("secrets", Some("web"), "db", &secret)).unwrap();
        assert_eq!(outcome, DriftOutcome::InSync);
    }

    #[test]
    fn test_disabled_policy_skips_events() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context_at(dir.path(), disabled_policy()));
        let handler = DriftHandler::new(Arc::clone(&ctx));

        let outcome = block_on(handler.write_resource(
            "configmaps",
            Some("web"),
            "app",
            &config_map("web", "app", "v1"),
        ))
        .unwrap();
        assert_eq!(outcome, DriftOutcome::Skipped(SkipReason::Disabled));
        assert!(ctx.queue.is_empty());
    }
}
