//! Init container injection for dependent Deployments

use crate::crds::ServiceDependency;
use crate::tasks::config::ImagesConfig;
use crate::tasks::script::{synthesize, WaitStep};
use crate::tasks::types::Result;
use k8s_openapi::api::core::v1::Container;
use std::collections::HashSet;
use tracing::debug;

/// Container running one synthesized wait step
pub fn wait_container(step: &WaitStep, images: &ImagesConfig) -> Container {
    let image = if step.strategy.needs_curl() {
        &images.curl
    } else {
        &images.busybox
    };

    Container {
        name: step.name.clone(),
        image: Some(image.clone()),
        image_pull_policy: Some(images.pull_policy.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            step.command.clone(),
        ]),
        ..Container::default()
    }
}

/// Prepend one wait container per declaration ahead of `existing`.
///
/// Steps whose name is already present (from a previous admission, or an
/// earlier declaration with the same target) are skipped, so repeated
/// injection never duplicates a container.
pub fn inject_wait_containers(
    existing: &[Container],
    dependencies: &[ServiceDependency],
    images: &ImagesConfig,
) -> Result<Vec<Container>> {
    let mut present: HashSet<String> = existing.iter().map(|c| c.name.clone()).collect();
    let mut injected = Vec::with_capacity(dependencies.len() + existing.len());

    for dep in dependencies {
        let step = synthesize(dep)?;
        if !present.insert(step.name.clone()) {
            debug!(container = %step.name, "Wait container already present, skipping");
            continue;
        }
        injected.push(wait_container(&step, images));
    }

    injected.extend_from_slice(existing);
    Ok(injected)
}
