//! Admission gate for `BootDependency` writes

use crate::crds::BootDependency;
use crate::tasks::graph::{self, CycleCheck};
use crate::tasks::store::DependencyStore;
use crate::tasks::types::Error;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::ResourceExt;
use tracing::{info, instrument, warn};

/// Reject malformed declarations and any write that would close a dependency loop.
///
/// Deletes are always allowed; removing edges can never create a cycle.
#[instrument(skip(req, store), fields(name = %req.name, namespace = ?req.namespace, operation = ?req.operation))]
pub async fn validate_boot_dependency(
    req: &AdmissionRequest<BootDependency>,
    store: &dyn DependencyStore,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return response;
    }

    let Some(object) = req.object.as_ref() else {
        return response.deny("admission request carries no BootDependency object");
    };
    let Some(namespace) = req.namespace.clone().or_else(|| object.namespace()) else {
        return response.deny("BootDependency must be namespaced");
    };

    // Creates may arrive before defaulting fills in metadata
    let mut candidate = object.clone();
    candidate.metadata.namespace = Some(namespace.clone());
    if candidate.metadata.name.as_deref().unwrap_or_default().is_empty() {
        candidate.metadata.name = Some(req.name.clone());
    }

    if let Err(e) = candidate.spec.validate() {
        warn!(error = %e, "Rejecting malformed BootDependency");
        return response.deny(Error::from(e).to_string());
    }

    let existing = match store.list(&namespace).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(error = %e, "Failed to list BootDependencies for cycle check");
            return response.deny(e.to_string());
        }
    };

    match graph::check(&candidate, &existing) {
        CycleCheck::Acyclic => {
            info!(name = %candidate.name_any(), "BootDependency admitted");
            response
        }
        CycleCheck::Cycle(path) => {
            let err = Error::CircularDependency { path };
            warn!(error = %err, "Rejecting BootDependency");
            response.deny(err.to_string())
        }
    }
}
