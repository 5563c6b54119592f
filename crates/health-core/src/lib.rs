//! Health evaluation core for the node health agent
//!
//! This crate provides the core functionality for:
//! - Threshold-based classification of CPU and memory usage samples
//! - Per-monitor-instance state tracking
//! - Signal reduction (debounce/hysteresis) of state transitions
//! - Line intake and batching of the record stream
//! - Time-bounded caching of node capacity and container limits
//! - Health probes, telemetry and observability

pub mod capacity;
pub mod classifier;
pub mod error;
pub mod evaluator;
pub mod identity;
pub mod intake;
pub mod models;
pub mod observability;
pub mod policy;
pub mod probes;
pub mod reducer;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use capacity::{
    resolve_identity, CapacityCache, ClusterDataSource, ClusterIdentity, ContainerLimits,
    NodeCapacity, NodeResources, RefreshOutcome, StaticClusterSource,
};
pub use classifier::{parse_metrics_to_collect, SampleClassifier};
pub use error::{ClassifyError, PolicyError, StoreError};
pub use identity::{resolve_instance_id, MonitorDimensions, MonitorInstance, MonitorInstanceId};
pub use intake::{IntakeStats, RecordIntake};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use policy::{MonitorPolicy, PolicyTable, ReductionStrategy, ThresholdBand};
pub use probes::{ComponentHealth, ComponentStatus, LivenessReport, ProbeRegistry, ReadinessReport};
pub use reducer::SignalReducer;
pub use store::{InstanceGuard, MonitorInstanceState, MonitorSummary, StateStore};
pub use telemetry::{Properties, TelemetryContext, TelemetrySink, TracingTelemetry};
