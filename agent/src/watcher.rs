//! Feeds cluster watch events into the reconciliation engine.

use std::sync::Arc;

use futures_util::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;

use gitvault::config::WorkloadSelector;
use gitvault::gitops::{DriftOutcome, IacHandle};
use gitvault::KubeCluster;

/// Spawns one watch task per workload type. Unknown types are skipped.
pub async fn spawn_watchers(
    cluster: &KubeCluster,
    workloads: &[WorkloadSelector],
    handle: Arc<dyn IacHandle>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();
    for workload in workloads {
        let (resource, _) = match cluster.resolve(&workload.resource).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Not watching {}: {}", workload.resource, e);
                continue;
            }
        };
        log::info!("Watching {}", resource.plural);

        let api: Api<DynamicObject> = Api::all_with(cluster.client().clone(), &resource);
        tasks.push(tokio::spawn(watch_resource(api, resource, Arc::clone(&handle))));
    }
    tasks
}

async fn watch_resource(api: Api<DynamicObject>, resource: ApiResource, handle: Arc<dyn IacHandle>) {
    let mut events = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Apply(object)) | Ok(Event::InitApply(object)) => {
                on_apply(&resource, object, handle.as_ref()).await;
            }
            Ok(Event::Delete(object)) => on_delete(&resource, object, handle.as_ref()).await,
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => log::warn!("Watch of {} interrupted: {}", resource.plural, e),
        }
    }

    log::warn!("Watch of {} ended", resource.plural);
}

async fn on_apply(resource: &ApiResource, mut object: DynamicObject, handle: &dyn IacHandle) {
    let Some(name) = object.metadata.name.clone() else {
        return;
    };
    let namespace = object.metadata.namespace.clone();
    if !handle.should_watch(&resource.plural, namespace.as_deref(), &name) {
        return;
    }

    // List results carry no type information.
    object.types.get_or_insert_with(|| TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    });

    let value = match serde_json::to_value(&object) {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to serialize {}/{}: {}", resource.plural, name, e);
            return;
        }
    };

    match handle
        .write_resource(&resource.plural, namespace.as_deref(), &name, &value)
        .await
    {
        Ok(DriftOutcome::Written) | Ok(DriftOutcome::Reverted) => {
            log::debug!("Handled change of {}/{}", resource.plural, name);
        }
        Ok(_) => {}
        Err(e) => log::debug!("Change of {}/{} not handled: {}", resource.plural, name, e),
    }
}

async fn on_delete(resource: &ApiResource, object: DynamicObject, handle: &dyn IacHandle) {
    let Some(name) = object.metadata.name else {
        return;
    };
    let namespace = object.metadata.namespace;
    if !handle.should_watch(&resource.plural, namespace.as_deref(), &name) {
        return;
    }

    if let Err(e) = handle
        .delete_resource(&resource.plural, namespace.as_deref(), &name)
        .await
    {
        log::debug!("Deletion of {}/{} not handled: {}", resource.plural, name, e);
    }
}
