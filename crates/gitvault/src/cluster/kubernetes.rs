//! [`ClusterClient`] backed by the Kubernetes API through `kube`.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::Client;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ClusterClient, ClusterError, Result};
use crate::gitops::resource::ResourceKey;

/// Resolves plural resource names through API discovery, cached after the
/// first lookup and refreshed on a miss.
pub struct KubeCluster {
    client: Client,
    resources: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Looks up a resource type by its plural name, e.g. `deployments`.
    pub async fn resolve(&self, plural: &str) -> Result<(ApiResource, ApiCapabilities)> {
        if let Some(found) = self.resources.read().await.get(plural) {
            return Ok(found.clone());
        }

        self.refresh_discovery().await?;

        self.resources
            .read()
            .await
            .get(plural)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownKind(plural.to_string()))
    }

    async fn refresh_discovery(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(map_kube_error)?;

        let mut resources = HashMap::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                resources
                    .entry(resource.plural.clone())
                    .or_insert((resource, capabilities));
            }
        }

        log::debug!("Discovered {} resource types", resources.len());
        *self.resources.write().await = resources;
        Ok(())
    }

    async fn api(&self, key: &ResourceKey) -> Result<Api<DynamicObject>> {
        let (resource, capabilities) = self.resolve(&key.kind).await?;
        Ok(match (&capabilities.scope, &key.namespace) {
            (Scope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }
}

fn to_dynamic(manifest: &Value) -> Result<DynamicObject> {
    serde_json::from_value(manifest.clone())
        .map_err(|e| ClusterError::InvalidManifest(e.to_string()))
}

fn map_kube_error(err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            ClusterError::NotFound(response.message)
        }
        kube::Error::Api(response) if response.code == 409 => {
            ClusterError::Conflict(response.message)
        }
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, key: &ResourceKey) -> Result<Value> {
        let object = self
            .api(key)
            .await?
            .get(&key.name)
            .await
            .map_err(map_kube_error)?;
        serde_json::to_value(object).map_err(|e| ClusterError::InvalidManifest(e.to_string()))
    }

    async fn create(&self, key: &ResourceKey, manifest: &Value) -> Result<()> {
        let object = to_dynamic(manifest)?;
        self.api(key)
            .await?
            .create(&PostParams::default(), &object)
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }

    async fn replace(&self, key: &ResourceKey, manifest: &Value) -> Result<()> {
        let object = to_dynamic(manifest)?;
        self.api(key)
            .await?
            .replace(&key.name, &PostParams::default(), &object)
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.api(key)
            .await?
            .delete(&key.name, &DeleteParams::default())
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}
