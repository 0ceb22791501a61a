use crate::crds::BootDependency;
use crate::tasks::metrics::{forget_dependencies, MetricsSink};
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, instrument, Instrument};

pub mod config;
pub mod graph;
pub mod inject;
pub mod metrics;
pub mod probe;
pub mod reconcile;
pub mod script;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use reconcile::{error_policy, reconcile_boot_dependency};
pub use types::{Context, Error, Result};

type ReconcileResult =
    std::result::Result<(ObjectRef<BootDependency>, Action), controller::Error<Error, watcher::Error>>;

/// Run the BootDependency controller until the watch stream ends
#[instrument(skip(client, context), fields(namespace = ?context.config.watch_namespace))]
pub async fn run_task_controller(client: Client, context: Arc<Context>) -> Result<()> {
    let api: Api<BootDependency> = match context.config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };
    let watcher_config = Config::default().any_semantic();

    info!("Starting BootDependency controller");

    let metrics = context.metrics.clone();
    Controller::new(api, watcher_config)
        .shutdown_on_signal()
        .run(reconcile_boot_dependency, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("bootdependency_reconciliation_result");
            let metrics = metrics.clone();
            async move { handle_reconciliation_result(reconciliation_result, metrics.as_ref()) }
                .instrument(span)
        })
        .await;

    info!("BootDependency controller shutting down");
    Ok(())
}

/// Log one controller outcome. A requeue for a deleted resource surfaces as
/// `ObjectNotFound`, which is where its gauges are dropped.
fn handle_reconciliation_result(result: ReconcileResult, metrics: &dyn MetricsSink) {
    match result {
        Ok(resource) => {
            info!(resource = ?resource, "BootDependency reconciliation successful");
        }
        Err(controller::Error::ObjectNotFound(resource)) => {
            info!(resource = %resource, "BootDependency no longer exists, dropping its gauges");
            if let Some(namespace) = resource.namespace.as_deref() {
                forget_dependencies(metrics, namespace, &resource.name);
            }
        }
        Err(reconciliation_err) => {
            error!(error = ?reconciliation_err, "BootDependency reconciliation error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::metrics::{record_dependencies, MetricsCollector, DEPENDENCIES_TOTAL};
    use std::time::Duration;

    #[test]
    fn test_deleted_resource_gauges_are_dropped() {
        let metrics = MetricsCollector::new();
        record_dependencies(&metrics, "default", "api", 2, 2);
        record_dependencies(&metrics, "default", "worker", 1, 0);

        let gone = ObjectRef::<BootDependency>::new("api").within("default");
        handle_reconciliation_result(
            Err(controller::Error::ObjectNotFound(gone.erase())),
            &metrics,
        );

        let api = [("namespace", "default"), ("name", "api")];
        let worker = [("namespace", "default"), ("name", "worker")];
        assert_eq!(metrics.gauge(DEPENDENCIES_TOTAL, &api), None);
        assert_eq!(metrics.gauge(DEPENDENCIES_TOTAL, &worker), Some(1.0));
    }

    #[test]
    fn test_successful_reconcile_keeps_gauges() {
        let metrics = MetricsCollector::new();
        record_dependencies(&metrics, "default", "api", 2, 2);

        let resource = ObjectRef::<BootDependency>::new("api").within("default");
        handle_reconciliation_result(
            Ok((resource, Action::requeue(Duration::from_secs(30)))),
            &metrics,
        );

        let api = [("namespace", "default"), ("name", "api")];
        assert_eq!(metrics.gauge(DEPENDENCIES_TOTAL, &api), Some(2.0));
    }
}
