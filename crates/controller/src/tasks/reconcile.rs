use crate::crds::{BootDependency, BootDependencyStatus};
use crate::tasks::metrics::{record_dependencies, record_reconcile, RESULT_ERROR, RESULT_SUCCESS};
use crate::tasks::probe::ProbeFailure;
use crate::tasks::status::{set_condition, DependencyCheck, ReadinessSummary, REASON_ALL_READY};
use crate::tasks::store::DependencyEvent;
use crate::tasks::types::{Context, Error, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub const REASON_DEPENDENCY_NOT_READY: &str = "DependencyNotReady";

#[instrument(skip(bd, ctx), fields(name = %bd.name_any(), namespace = ?bd.namespace()))]
pub async fn reconcile_boot_dependency(bd: Arc<BootDependency>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let result = evaluate_and_report(&bd, &ctx).await;

    let outcome = if result.is_ok() {
        RESULT_SUCCESS
    } else {
        RESULT_ERROR
    };
    record_reconcile(ctx.metrics.as_ref(), outcome, started.elapsed());

    result
}

async fn evaluate_and_report(bd: &BootDependency, ctx: &Context) -> Result<Action> {
    let name = bd.name_any();
    let namespace = bd
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    let summary = ctx
        .aggregator
        .evaluate(&bd.spec.depends_on, &namespace)
        .await;
    record_dependencies(
        ctx.metrics.as_ref(),
        &namespace,
        &name,
        summary.total,
        summary.resolved,
    );

    let status = next_status(bd, &summary);
    ctx.status.patch_status(&namespace, &name, status).await?;

    publish_events(bd, &summary, ctx).await;

    let delay = ctx.config.requeue.delay(summary.all_ready);
    info!(
        resolved = %summary.resolved_fraction(),
        all_ready = summary.all_ready,
        requeue_after = ?delay,
        "BootDependency reconciled"
    );
    Ok(Action::requeue(delay))
}

/// Status to write for `summary`, keeping unrelated conditions untouched
fn next_status(bd: &BootDependency, summary: &ReadinessSummary) -> BootDependencyStatus {
    let previous = bd
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    let mut conditions = previous.to_vec();
    set_condition(
        &mut conditions,
        summary.ready_condition(bd.metadata.generation, previous),
    );

    BootDependencyStatus {
        conditions,
        resolved_dependencies: Some(summary.resolved_fraction()),
    }
}

/// Events are best effort; a failed publish never fails the reconcile
async fn publish_events(bd: &BootDependency, summary: &ReadinessSummary, ctx: &Context) {
    let events: Vec<DependencyEvent> = if summary.all_ready {
        vec![DependencyEvent::normal(REASON_ALL_READY, summary.message())]
    } else {
        summary
            .unsatisfied()
            .map(|check| DependencyEvent::warning(REASON_DEPENDENCY_NOT_READY, not_ready_note(check)))
            .collect()
    };

    for event in events {
        if let Err(e) = ctx.events.publish(bd, event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

fn not_ready_note(check: &DependencyCheck) -> String {
    match &check.outcome.failure {
        Some(ProbeFailure::Invalid(reason)) => {
            format!("Dependency {}:{} is invalid: {reason}", check.label, check.port)
        }
        _ => format!("Dependency {}:{} is not reachable", check.label, check.port),
    }
}

/// Failed reconciles are retried on the faster not-ready cadence
pub fn error_policy(bd: Arc<BootDependency>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = %err,
        name = %bd.name_any(),
        "BootDependency reconciliation failed"
    );
    Action::requeue(ctx.config.requeue.delay(false))
}
