//! Observability for the health agent
//!
//! Provides:
//! - Prometheus metrics (classification latency, emitted/suppressed counts, capacity refreshes)
//! - Structured JSON logging with tracing

use crate::capacity::NodeCapacity;
use crate::models::{HealthRecord, HealthState};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for per-sample classification latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    classify_latency_seconds: Histogram,
    samples_processed: IntCounterVec,
    records_emitted: IntCounterVec,
    observations_suppressed: IntCounterVec,
    samples_ignored: IntCounter,
    samples_malformed: IntCounterVec,
    capacity_refreshes: IntCounter,
    capacity_refresh_failures: IntCounter,
    monitor_instances: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            classify_latency_seconds: register_histogram!(
                "health_agent_classify_latency_seconds",
                "Time spent classifying one raw sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register classify_latency_seconds"),

            samples_processed: register_int_counter_vec!(
                "health_agent_samples_processed_total",
                "Raw samples handed to the classifier, by sample kind",
                &["kind"]
            )
            .expect("Failed to register samples_processed"),

            records_emitted: register_int_counter_vec!(
                "health_agent_records_emitted_total",
                "Health records emitted downstream",
                &["monitor_type", "state"]
            )
            .expect("Failed to register records_emitted"),

            observations_suppressed: register_int_counter_vec!(
                "health_agent_observations_suppressed_total",
                "Observations suppressed by signal reduction",
                &["monitor_type"]
            )
            .expect("Failed to register observations_suppressed"),

            samples_ignored: register_int_counter!(
                "health_agent_samples_ignored_total",
                "Samples for counters or objects that are not monitored"
            )
            .expect("Failed to register samples_ignored"),

            samples_malformed: register_int_counter_vec!(
                "health_agent_samples_malformed_total",
                "Samples discarded as malformed or unevaluable",
                &["reason"]
            )
            .expect("Failed to register samples_malformed"),

            capacity_refreshes: register_int_counter!(
                "health_agent_capacity_refreshes_total",
                "Successful capacity and limit refreshes"
            )
            .expect("Failed to register capacity_refreshes"),

            capacity_refresh_failures: register_int_counter!(
                "health_agent_capacity_refresh_failures_total",
                "Capacity and limit refreshes that failed and kept stale data"
            )
            .expect("Failed to register capacity_refresh_failures"),

            monitor_instances: register_int_gauge!(
                "health_agent_monitor_instances",
                "Monitor instances held in the state store"
            )
            .expect("Failed to register monitor_instances"),
        }
    }
}

/// Handle to the process-wide agent metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct AgentMetrics {
    inner: &'static AgentMetricsInner,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(AgentMetricsInner::new),
        }
    }

    pub fn observe_classify_latency(&self, duration_secs: f64) {
        self.inner.classify_latency_seconds.observe(duration_secs);
    }

    pub fn inc_samples_processed(&self, kind: &str) {
        self.inner.samples_processed.with_label_values(&[kind]).inc();
    }

    pub fn inc_records_emitted(&self, monitor_type: &str, state: HealthState) {
        self.inner
            .records_emitted
            .with_label_values(&[monitor_type, state.as_str()])
            .inc();
    }

    pub fn inc_observations_suppressed(&self, monitor_type: &str) {
        self.inner
            .observations_suppressed
            .with_label_values(&[monitor_type])
            .inc();
    }

    pub fn inc_samples_ignored(&self) {
        self.inner.samples_ignored.inc();
    }

    pub fn inc_malformed(&self, reason: &str) {
        self.inner.samples_malformed.with_label_values(&[reason]).inc();
    }

    pub fn inc_capacity_refreshes(&self) {
        self.inner.capacity_refreshes.inc();
    }

    pub fn inc_capacity_refresh_failures(&self) {
        self.inner.capacity_refresh_failures.inc();
    }

    pub fn set_monitor_instances(&self, count: i64) {
        self.inner.monitor_instances.set(count);
    }
}

/// Structured logger for agent events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, monitors_configured: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            monitors_configured = monitors_configured,
            "Health agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Health agent shutting down"
        );
    }

    /// Log an emitted state change; degradations log at warn
    pub fn log_state_transition(&self, record: &HealthRecord) {
        let previous = record
            .previous_state
            .map(|s| s.as_str())
            .unwrap_or("none");

        let degraded = record.previous_state.map_or(
            record.state != HealthState::Healthy,
            |prev| record.state > prev,
        );

        if degraded {
            warn!(
                event = "monitor_state_changed",
                node = %self.node_name,
                monitor_instance_id = %record.monitor_instance_id,
                monitor_type = %record.monitor_type,
                previous_state = %previous,
                state = %record.state,
                details = ?record.details,
                "Monitor state degraded"
            );
        } else {
            info!(
                event = "monitor_state_changed",
                node = %self.node_name,
                monitor_instance_id = %record.monitor_instance_id,
                monitor_type = %record.monitor_type,
                previous_state = %previous,
                state = %record.state,
                "Monitor state changed"
            );
        }
    }

    pub fn log_capacity_refreshed(&self, capacity: &NodeCapacity, containers: usize) {
        debug!(
            event = "capacity_refreshed",
            node = %self.node_name,
            cpu_nanocores = capacity.cpu_nanocores,
            memory_bytes = capacity.memory_bytes,
            containers_with_limits = containers,
            "Refreshed node capacity and container limits"
        );
    }

    pub fn log_capacity_refresh_failed(&self, error: &anyhow::Error) {
        warn!(
            event = "capacity_refresh_failed",
            node = %self.node_name,
            error = %format!("{:#}", error),
            "Capacity refresh failed, serving cached values"
        );
    }

    pub fn log_batch(&self, received: usize, emitted: usize) {
        debug!(
            event = "batch_processed",
            node = %self.node_name,
            received = received,
            emitted = emitted,
            "Processed sample batch"
        );
    }
}
