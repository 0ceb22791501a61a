//! Wait-for init container injection on Deployment admission

use crate::tasks::config::ImagesConfig;
use crate::tasks::inject::inject_wait_containers;
use crate::tasks::store::DependencyStore;
use crate::tasks::types::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

const INIT_CONTAINERS_PATH: &str = "/spec/template/spec/initContainers";

/// Prepend wait-for init containers when a `BootDependency` shares the Deployment's name.
///
/// A lookup failure denies the request so a gated workload never starts
/// without its waits.
#[instrument(skip(req, store, images), fields(name = %req.name, namespace = ?req.namespace, operation = ?req.operation))]
pub async fn mutate_deployment(
    req: &AdmissionRequest<Deployment>,
    store: &dyn DependencyStore,
    images: &ImagesConfig,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return response;
    }
    let Some(deployment) = req.object.as_ref() else {
        return response;
    };
    let Some(namespace) = req.namespace.clone().or_else(|| deployment.namespace()) else {
        return response;
    };
    let name = deployment
        .metadata
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| req.name.clone());

    let boot_dependency = match store.get(&namespace, &name).await {
        Ok(Some(bd)) => bd,
        Ok(None) => {
            debug!("No BootDependency for Deployment, nothing to inject");
            return response;
        }
        Err(e) => {
            warn!(error = %e, "Failed to look up BootDependency");
            return response.deny(format!(
                "failed to get BootDependency {namespace}/{name}: {e}"
            ));
        }
    };

    let Some(pod_spec) = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
    else {
        warn!("Deployment has no pod template spec, skipping injection");
        return response;
    };
    let existing = pod_spec.init_containers.clone().unwrap_or_default();

    let updated = match inject_wait_containers(&existing, &boot_dependency.spec.depends_on, images) {
        Ok(updated) => updated,
        Err(e) => {
            warn!(error = %e, "Cannot build wait containers");
            return response.deny(e.to_string());
        }
    };

    if updated == existing {
        debug!("Wait containers already present");
        return response;
    }

    info!(
        injected = updated.len() - existing.len(),
        dependencies = boot_dependency.spec.depends_on.len(),
        "Injecting wait-for init containers"
    );
    let patch = match init_containers_patch(&updated) {
        Ok(patch) => patch,
        Err(e) => return response.deny(e.to_string()),
    };
    response.with_patch(patch).unwrap_or_else(|e| {
        AdmissionResponse::from(req).deny(format!("failed to serialize patch: {e}"))
    })
}

/// JSON Patch setting the pod template's init containers
pub fn init_containers_patch(containers: &[Container]) -> Result<json_patch::Patch> {
    let patch = serde_json::from_value(json!([{
        "op": "add",
        "path": INIT_CONTAINERS_PATH,
        "value": serde_json::to_value(containers)?,
    }]))?;
    Ok(patch)
}
