//! Readiness aggregation across a `BootDependency`'s declarations

use crate::crds::{BootDependencyCondition, ServiceDependency};
use crate::tasks::probe::{ProbeOutcome, Prober};
use futures::future::join_all;
use tracing::{info, instrument};

pub const CONDITION_READY: &str = "Ready";
pub const REASON_ALL_READY: &str = "AllDependenciesReady";
pub const REASON_NOT_READY: &str = "DependenciesNotReady";

/// Outcome for one declaration, kept in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub label: String,
    pub port: i32,
    pub outcome: ProbeOutcome,
}

/// Aggregate readiness of a dependency set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSummary {
    pub resolved: usize,
    pub total: usize,
    pub all_ready: bool,
    pub checks: Vec<DependencyCheck>,
}

impl ReadinessSummary {
    pub fn from_checks(checks: Vec<DependencyCheck>) -> Self {
        let resolved = checks.iter().filter(|c| c.outcome.satisfied).count();
        let total = checks.len();
        Self {
            resolved,
            total,
            all_ready: resolved == total,
            checks,
        }
    }

    /// `"{resolved}/{total}"`, as shown in the Resolved print column
    pub fn resolved_fraction(&self) -> String {
        format!("{}/{}", self.resolved, self.total)
    }

    pub fn unsatisfied(&self) -> impl Iterator<Item = &DependencyCheck> {
        self.checks.iter().filter(|c| !c.outcome.satisfied)
    }

    pub fn reason(&self) -> &'static str {
        if self.all_ready {
            REASON_ALL_READY
        } else {
            REASON_NOT_READY
        }
    }

    pub fn message(&self) -> String {
        if self.all_ready {
            format!("All {} dependencies are reachable", self.total)
        } else {
            format!("{}/{} dependencies are reachable", self.resolved, self.total)
        }
    }

    /// The `Ready` condition for this summary.
    ///
    /// `lastTransitionTime` is carried over from `previous` unless the status flips.
    pub fn ready_condition(
        &self,
        generation: Option<i64>,
        previous: &[BootDependencyCondition],
    ) -> BootDependencyCondition {
        let status = if self.all_ready { "True" } else { "False" };
        let last_transition_time = previous
            .iter()
            .find(|c| c.condition_type == CONDITION_READY && c.status == status)
            .and_then(|c| c.last_transition_time.clone())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        BootDependencyCondition {
            condition_type: CONDITION_READY.to_string(),
            status: status.to_string(),
            observed_generation: generation,
            last_transition_time: Some(last_transition_time),
            reason: Some(self.reason().to_string()),
            message: Some(self.message()),
        }
    }
}

/// Replace the condition of the same type, or append it
pub fn set_condition(conditions: &mut Vec<BootDependencyCondition>, condition: BootDependencyCondition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Runs the prober over every declaration of one `BootDependency`
#[derive(Clone)]
pub struct StatusAggregator {
    prober: Prober,
}

impl StatusAggregator {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }

    /// Probe all declarations concurrently; results keep declaration order.
    #[instrument(skip(self, dependencies), fields(namespace = %namespace, total = dependencies.len()))]
    pub async fn evaluate(&self, dependencies: &[ServiceDependency], namespace: &str) -> ReadinessSummary {
        let outcomes = join_all(
            dependencies
                .iter()
                .map(|dep| self.prober.probe(dep, namespace)),
        )
        .await;

        let checks: Vec<DependencyCheck> = dependencies
            .iter()
            .zip(outcomes)
            .map(|(dep, outcome)| {
                if outcome.satisfied {
                    info!(dependency = %dep.label(), port = dep.port, "Dependency reachable");
                } else {
                    info!(
                        dependency = %dep.label(),
                        port = dep.port,
                        error = %outcome.detail,
                        "Dependency not reachable"
                    );
                }
                DependencyCheck {
                    label: dep.label().to_string(),
                    port: dep.port,
                    outcome,
                }
            })
            .collect();

        ReadinessSummary::from_checks(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn aggregator() -> StatusAggregator {
        StatusAggregator::new(Prober::new(Duration::from_secs(2), "svc.cluster.local").unwrap())
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_evaluate_counts_resolved_in_declaration_order() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = open.local_addr().unwrap().port();
        let closed = closed_port().await;

        let deps = vec![
            ServiceDependency::host("127.0.0.1", i32::from(closed)),
            ServiceDependency::host("127.0.0.1", i32::from(open_port)),
        ];
        let summary = aggregator().evaluate(&deps, "default").await;

        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.total, 2);
        assert!(!summary.all_ready);
        assert_eq!(summary.resolved_fraction(), "1/2");
        assert_eq!(summary.checks[0].port, i32::from(closed));
        assert!(!summary.checks[0].outcome.satisfied);
        assert!(summary.checks[1].outcome.satisfied);
        assert_eq!(summary.unsatisfied().count(), 1);
        assert_eq!(summary.reason(), REASON_NOT_READY);
        assert_eq!(summary.message(), "1/2 dependencies are reachable");
    }

    #[tokio::test]
    async fn test_evaluate_all_ready() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = i32::from(open.local_addr().unwrap().port());
        let deps = vec![ServiceDependency::host("127.0.0.1", port)];

        let summary = aggregator().evaluate(&deps, "default").await;
        assert!(summary.all_ready);
        assert_eq!(summary.resolved_fraction(), "1/1");
        assert_eq!(summary.reason(), REASON_ALL_READY);
        assert_eq!(summary.message(), "All 1 dependencies are reachable");
    }

    fn summary(resolved: usize, total: usize) -> ReadinessSummary {
        ReadinessSummary {
            resolved,
            total,
            all_ready: resolved == total,
            checks: vec![],
        }
    }

    #[test]
    fn test_condition_keeps_transition_time_while_status_is_unchanged() {
        let previous = vec![BootDependencyCondition {
            condition_type: CONDITION_READY.to_string(),
            status: "False".to_string(),
            observed_generation: Some(1),
            last_transition_time: Some("2025-01-01T00:00:00+00:00".to_string()),
            reason: Some(REASON_NOT_READY.to_string()),
            message: Some("0/2 dependencies are reachable".to_string()),
        }];

        let still_waiting = summary(1, 2).ready_condition(Some(2), &previous);
        assert_eq!(
            still_waiting.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
        assert_eq!(still_waiting.observed_generation, Some(2));
        assert_eq!(still_waiting.message.as_deref(), Some("1/2 dependencies are reachable"));

        let ready = summary(2, 2).ready_condition(Some(2), &previous);
        assert_eq!(ready.status, "True");
        assert_eq!(ready.reason.as_deref(), Some(REASON_ALL_READY));
        assert_ne!(
            ready.last_transition_time.as_deref(),
            Some("2025-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut conditions = vec![];
        set_condition(&mut conditions, summary(0, 1).ready_condition(None, &[]));
        set_condition(&mut conditions, summary(1, 1).ready_condition(None, &[]));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
    }
}
