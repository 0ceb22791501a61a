//! # Prometheus Metrics Collection
//!
//! Reconcile outcomes and dependency gauges are recorded through the
//! [`MetricsSink`] trait and rendered in Prometheus text format by
//! [`MetricsCollector`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

pub const RECONCILE_TOTAL: &str = "bootchain_reconcile_total";
pub const RECONCILE_DURATION: &str = "bootchain_reconcile_duration_seconds";
pub const DEPENDENCIES_TOTAL: &str = "bootchain_dependencies_total";
pub const DEPENDENCIES_READY: &str = "bootchain_dependencies_ready";

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

/// Label pairs in declaration order
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Destination for controller metrics
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, labels: Labels<'_>);
    fn observe_duration(&self, name: &str, labels: Labels<'_>, duration: Duration);
    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64);
    fn remove_gauge(&self, name: &str, labels: Labels<'_>);
}

/// Record one reconcile pass
pub fn record_reconcile(sink: &dyn MetricsSink, result: &str, elapsed: Duration) {
    let labels = [("result", result)];
    sink.increment_counter(RECONCILE_TOTAL, &labels);
    sink.observe_duration(RECONCILE_DURATION, &labels, elapsed);
}

/// Publish per-resource dependency gauges
pub fn record_dependencies(
    sink: &dyn MetricsSink,
    namespace: &str,
    name: &str,
    total: usize,
    ready: usize,
) {
    let labels = [("namespace", namespace), ("name", name)];
    sink.set_gauge(DEPENDENCIES_TOTAL, &labels, total as f64);
    sink.set_gauge(DEPENDENCIES_READY, &labels, ready as f64);
}

/// Drop the gauges of a resource that no longer exists
pub fn forget_dependencies(sink: &dyn MetricsSink, namespace: &str, name: &str) {
    let labels = [("namespace", namespace), ("name", name)];
    sink.remove_gauge(DEPENDENCIES_TOTAL, &labels);
    sink.remove_gauge(DEPENDENCIES_READY, &labels);
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DurationSummary {
    sum: f64,
    count: u64,
}

#[derive(Debug, Default)]
struct Series {
    counters: BTreeMap<String, BTreeMap<String, u64>>,
    gauges: BTreeMap<String, BTreeMap<String, f64>>,
    durations: BTreeMap<String, BTreeMap<String, DurationSummary>>,
}

/// In-process metrics store
#[derive(Debug, Default)]
pub struct MetricsCollector {
    series: Mutex<Series>,
}

fn render_labels(labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| {
            let escaped = v.replace('\\', r"\\").replace('"', "\\\"").replace('\n', r"\n");
            format!("{k}=\"{escaped}\"")
        })
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn help_text(name: &str) -> &'static str {
    match name {
        RECONCILE_TOTAL => "Total number of BootDependency reconciliations by result",
        RECONCILE_DURATION => "Duration of BootDependency reconciliations by result",
        DEPENDENCIES_TOTAL => "Number of dependencies declared by a BootDependency",
        DEPENDENCIES_READY => "Number of reachable dependencies of a BootDependency",
        _ => "Bootchain controller metric",
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Series> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.lock()
            .counters
            .get(name)
            .and_then(|s| s.get(&render_labels(labels)))
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        self.lock()
            .gauges
            .get(name)
            .and_then(|s| s.get(&render_labels(labels)))
            .copied()
    }

    /// Observation count for a duration series
    pub fn observations(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.lock()
            .durations
            .get(name)
            .and_then(|s| s.get(&render_labels(labels)))
            .map_or(0, |d| d.count)
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus_metrics(&self) -> String {
        let series = self.lock();
        let mut output = String::new();

        for (name, values) in &series.counters {
            let _ = writeln!(output, "# HELP {name} {}", help_text(name));
            let _ = writeln!(output, "# TYPE {name} counter");
            for (labels, value) in values {
                let _ = writeln!(output, "{name}{labels} {value}");
            }
        }

        for (name, values) in &series.durations {
            let _ = writeln!(output, "# HELP {name} {}", help_text(name));
            let _ = writeln!(output, "# TYPE {name} summary");
            for (labels, summary) in values {
                let _ = writeln!(output, "{name}_sum{labels} {}", summary.sum);
                let _ = writeln!(output, "{name}_count{labels} {}", summary.count);
            }
        }

        for (name, values) in &series.gauges {
            let _ = writeln!(output, "# HELP {name} {}", help_text(name));
            let _ = writeln!(output, "# TYPE {name} gauge");
            for (labels, value) in values {
                let _ = writeln!(output, "{name}{labels} {value}");
            }
        }

        output
    }
}

impl MetricsSink for MetricsCollector {
    fn increment_counter(&self, name: &str, labels: Labels<'_>) {
        *self
            .lock()
            .counters
            .entry(name.to_string())
            .or_default()
            .entry(render_labels(labels))
            .or_insert(0) += 1;
    }

    fn observe_duration(&self, name: &str, labels: Labels<'_>, duration: Duration) {
        let mut series = self.lock();
        let summary = series
            .durations
            .entry(name.to_string())
            .or_default()
            .entry(render_labels(labels))
            .or_default();
        summary.sum += duration.as_secs_f64();
        summary.count += 1;
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        debug!(metric = name, value, "Updating gauge");
        self.lock()
            .gauges
            .entry(name.to_string())
            .or_default()
            .insert(render_labels(labels), value);
    }

    fn remove_gauge(&self, name: &str, labels: Labels<'_>) {
        let mut series = self.lock();
        let Some(values) = series.gauges.get_mut(name) else {
            return;
        };
        values.remove(&render_labels(labels));
        if values.is_empty() {
            series.gauges.remove(name);
        }
    }
}
