//! Shared fixtures and test doubles

use crate::capacity::{ClusterDataSource, ClusterIdentity, ContainerLimits, NodeCapacity, NodeResources};
use crate::identity::{MonitorDimensions, MonitorInstance};
use crate::models::{Details, HealthObservation, HealthState, MonitorType, NANOCORES_PER_CORE};
use crate::telemetry::{Properties, TelemetrySink};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const CLUSTER_ID: &str = "c1";
pub const NODE_NAME: &str = "n1";

/// `secs` seconds after a fixed epoch
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
}

pub fn rfc3339(secs: i64) -> String {
    at(secs).to_rfc3339()
}

pub fn observation(secs: i64, state: HealthState) -> HealthObservation {
    HealthObservation {
        timestamp: at(secs),
        state,
        details: Details::new(),
    }
}

pub fn node_instance() -> MonitorInstance {
    MonitorInstance::resolve(
        MonitorType::NodeCpuUtilization,
        MonitorDimensions::node(CLUSTER_ID, NODE_NAME),
    )
}

pub fn container_instance(key: &str) -> MonitorInstance {
    MonitorInstance::resolve(
        MonitorType::ContainerCpuUtilization,
        MonitorDimensions::container(CLUSTER_ID, NODE_NAME, key),
    )
}

/// In-memory data source that counts queries and can be told to fail
pub struct CountingSource {
    pub capacity: Mutex<NodeCapacity>,
    pub limits: Mutex<HashMap<String, ContainerLimits>>,
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl CountingSource {
    pub fn new(cpu_cores: f64, memory_bytes: f64) -> Self {
        Self {
            capacity: Mutex::new(NodeCapacity {
                cpu_nanocores: cpu_cores * NANOCORES_PER_CORE,
                memory_bytes,
            }),
            limits: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_limit(self, key: &str, limits: ContainerLimits) -> Self {
        self.limits.lock().unwrap().insert(key.to_string(), limits);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterDataSource for CountingSource {
    async fn cluster_identity(&self) -> Result<ClusterIdentity> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("cluster API unreachable");
        }
        Ok(ClusterIdentity {
            cluster_id: CLUSTER_ID.to_string(),
            node_name: NODE_NAME.to_string(),
            region: Some("westeurope".to_string()),
        })
    }

    async fn node_resources(&self, _node_name: &str) -> Result<NodeResources> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("cluster API unreachable");
        }
        Ok(NodeResources {
            capacity: *self.capacity.lock().unwrap(),
            container_limits: self.limits.lock().unwrap().clone(),
        })
    }
}

/// Telemetry sink that keeps every report
#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<(String, Properties)>>,
    pub exceptions: Mutex<Vec<(String, Properties)>>,
}

impl RecordingTelemetry {
    pub fn exception_count(&self) -> usize {
        self.exceptions.lock().unwrap().len()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn report_exception(&self, error: &anyhow::Error, properties: &Properties) {
        self.exceptions
            .lock()
            .unwrap()
            .push((error.to_string(), properties.clone()));
    }

    fn report_event(&self, name: &str, properties: &Properties) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties.clone()));
    }
}
