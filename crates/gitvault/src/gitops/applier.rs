//! Applies committed manifests to the cluster.

use serde_json::Value;

use super::batch::ChangeType;
use super::context::IacContext;
use super::error::{GitOpsError, Result};
use super::normalize::{parse_manifest, SecretTreatment};
use super::resource::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Live object already matches the manifest.
    Unchanged,
    Created,
    Replaced,
}

/// Parses a repository-relative path into a resource key.
pub fn key_for_path(relative_path: &str) -> Result<ResourceKey> {
    ResourceKey::from_relative_path(relative_path)
        .ok_or_else(|| GitOpsError::InvalidPath(relative_path.to_string()))
}

/// Creates or replaces the resource described by the manifest at `relative_path`.
///
/// A Secret committed with plaintext values is encrypted in place first and
/// the rewrite is queued for the next push.
pub async fn apply_file(ctx: &IacContext, relative_path: &str) -> Result<ApplyOutcome> {
    let key = key_for_path(relative_path)?;
    let path = key.absolute_path(ctx.data_path());

    let content = ctx
        .read_committed(&key)?
        .ok_or_else(|| GitOpsError::ReadFile {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "manifest does not exist"),
        })?;

    let object = parse_manifest(&content).map_err(|e| GitOpsError::ParseYaml {
        path: path.clone(),
        message: e.to_string(),
    })?;

    if ctx.normalizer.has_plaintext_secret_values(&object) {
        let encrypted = ctx.normalizer.to_yaml(&object, SecretTreatment::Encrypt)?;
        ctx.write_manifest(&key, &encrypted)?;
        log::info!("Encrypted plaintext secret values in {}", relative_path);
        if ctx.policy.allow_push {
            ctx.enqueue(&key, ChangeType::Modify, "Encrypted");
        }
    }

    let manifest = ctx.normalizer.normalize(&object, SecretTreatment::Decrypt)?;
    apply_manifest(ctx, &key, manifest).await
}

async fn apply_manifest(
    ctx: &IacContext,
    key: &ResourceKey,
    mut manifest: Value,
) -> Result<ApplyOutcome> {
    match ctx.cluster.get(key).await {
        Ok(live) => {
            let current = ctx.normalizer.normalize(&live, SecretTreatment::Nothing)?;
            if current == manifest {
                log::debug!("{} already matches the repository", key);
                return Ok(ApplyOutcome::Unchanged);
            }

            if let (Some(version), Some(Value::Object(metadata))) = (
                live.pointer("/metadata/resourceVersion").cloned(),
                manifest.get_mut("metadata"),
            ) {
                metadata.insert("resourceVersion".to_string(), version);
            }

            ctx.cluster.replace(key, &manifest).await?;
            log::info!("Replaced {} from the repository", key);
            Ok(ApplyOutcome::Replaced)
        }
        Err(e) if e.is_not_found() => {
            ctx.cluster.create(key, &manifest).await?;
            log::info!("Created {} from the repository", key);
            Ok(ApplyOutcome::Created)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the resource from the cluster. Already gone counts as success.
pub async fn delete_resource(ctx: &IacContext, key: &ResourceKey) -> Result<()> {
    match ctx.cluster.delete(key).await {
        Ok(()) => {
            log::info!("Deleted {} from the cluster", key);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            log::debug!("{} was already gone", key);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
