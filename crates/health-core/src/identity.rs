//! Monitor instance identity
//!
//! A monitor instance id is a deterministic function of the monitor type and
//! the dimension tuple of the entity it evaluates. Dimensions are kept sorted
//! by key, so insertion order never changes the id.

use crate::models::MonitorType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub const DIMENSION_CLUSTER_ID: &str = "cluster_id";
pub const DIMENSION_NODE_NAME: &str = "node_name";
pub const DIMENSION_CONTAINER_KEY: &str = "container_key";

/// Stable identifier of one monitored entity for one monitor type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorInstanceId(String);

impl MonitorInstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of `(key, value)` dimensions describing an entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorDimensions(BTreeMap<String, String>);

impl MonitorDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensions of a node-scoped monitor
    pub fn node(cluster_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self::new()
            .with(DIMENSION_CLUSTER_ID, cluster_id)
            .with(DIMENSION_NODE_NAME, node_name)
    }

    /// Dimensions of a container-scoped monitor
    pub fn container(
        cluster_id: impl Into<String>,
        node_name: impl Into<String>,
        container_key: impl Into<String>,
    ) -> Self {
        Self::node(cluster_id, node_name).with(DIMENSION_CONTAINER_KEY, container_key)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compute the instance id for a monitor type and dimension tuple.
///
/// Encoding: the monitor type id, then `key=value` for each dimension in key
/// order, every part separated by a NUL byte, hashed with SHA-256.
pub fn resolve_instance_id(
    monitor_type: MonitorType,
    dimensions: &MonitorDimensions,
) -> MonitorInstanceId {
    let mut hasher = Sha256::new();
    hasher.update(monitor_type.as_str().as_bytes());
    for (key, value) in dimensions.iter() {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }

    MonitorInstanceId(format!(
        "{}-{}",
        monitor_type.as_str(),
        hex::encode(hasher.finalize())
    ))
}

/// A monitor type bound to one entity, with its resolved id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInstance {
    pub id: MonitorInstanceId,
    pub monitor_type: MonitorType,
    pub labels: MonitorDimensions,
}

impl MonitorInstance {
    pub fn resolve(monitor_type: MonitorType, labels: MonitorDimensions) -> Self {
        Self {
            id: resolve_instance_id(monitor_type, &labels),
            monitor_type,
            labels,
        }
    }
}
