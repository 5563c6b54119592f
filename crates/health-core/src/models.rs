//! Core data models for the health monitor

use crate::error::ClassifyError;
use crate::identity::{MonitorDimensions, MonitorInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Object name of node-level samples
pub const OBJECT_NAME_NODE: &str = "K8SNode";
/// Object name of container-level samples
pub const OBJECT_NAME_CONTAINER: &str = "K8SContainer";

/// Counter carrying CPU usage in nanocores
pub const COUNTER_CPU_USAGE: &str = "cpuUsageNanoCores";
/// Counter carrying resident memory in bytes
pub const COUNTER_MEMORY_RSS: &str = "memoryRssBytes";

/// Counters collected when no explicit list is configured
pub const DEFAULT_METRICS_TO_COLLECT: &str = "cpuUsageNanoCores,memoryRssBytes";

pub const NANOCORES_PER_MILLICORE: f64 = 1_000_000.0;
pub const NANOCORES_PER_CORE: f64 = 1_000_000_000.0;

/// Metric-specific detail values attached to an observation
pub type Details = BTreeMap<String, f64>;

/// Discrete health classification of a single observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => Ok(HealthState::Healthy),
            "warning" => Ok(HealthState::Warning),
            "critical" => Ok(HealthState::Critical),
            other => Err(format!("unknown health state '{}'", other)),
        }
    }
}

/// Resource measured by a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }
}

/// Category of health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    NodeCpuUtilization,
    NodeMemoryUtilization,
    ContainerCpuUtilization,
    ContainerMemoryUtilization,
}

impl MonitorType {
    pub const ALL: [MonitorType; 4] = [
        MonitorType::NodeCpuUtilization,
        MonitorType::NodeMemoryUtilization,
        MonitorType::ContainerCpuUtilization,
        MonitorType::ContainerMemoryUtilization,
    ];

    /// Stable identifier used in policy files and instance ids
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorType::NodeCpuUtilization => "node_cpu_utilization",
            MonitorType::NodeMemoryUtilization => "node_memory_utilization",
            MonitorType::ContainerCpuUtilization => "container_cpu_utilization",
            MonitorType::ContainerMemoryUtilization => "container_memory_utilization",
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            MonitorType::NodeCpuUtilization | MonitorType::ContainerCpuUtilization => Resource::Cpu,
            MonitorType::NodeMemoryUtilization | MonitorType::ContainerMemoryUtilization => {
                Resource::Memory
            }
        }
    }

    pub fn is_container_scoped(&self) -> bool {
        matches!(
            self,
            MonitorType::ContainerCpuUtilization | MonitorType::ContainerMemoryUtilization
        )
    }
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorType {
    type Err = crate::error::PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MonitorType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| crate::error::PolicyError::UnknownMonitorType(s.to_string()))
    }
}

/// What a raw sample represents, resolved once from its object and counter names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    NodeCpu,
    NodeMemory,
    ContainerCpu,
    ContainerMemory,
    Unrecognized,
}

impl SampleKind {
    /// Resolve the kind from `(ObjectName, CounterName)`, case-insensitively
    pub fn resolve(object_name: &str, counter_name: &str) -> Self {
        let is_cpu = counter_name.eq_ignore_ascii_case(COUNTER_CPU_USAGE);
        let is_memory = counter_name.eq_ignore_ascii_case(COUNTER_MEMORY_RSS);

        if object_name.eq_ignore_ascii_case(OBJECT_NAME_NODE) {
            match (is_cpu, is_memory) {
                (true, _) => SampleKind::NodeCpu,
                (_, true) => SampleKind::NodeMemory,
                _ => SampleKind::Unrecognized,
            }
        } else if object_name.eq_ignore_ascii_case(OBJECT_NAME_CONTAINER) {
            match (is_cpu, is_memory) {
                (true, _) => SampleKind::ContainerCpu,
                (_, true) => SampleKind::ContainerMemory,
                _ => SampleKind::Unrecognized,
            }
        } else {
            SampleKind::Unrecognized
        }
    }

    pub fn monitor_type(&self) -> Option<MonitorType> {
        match self {
            SampleKind::NodeCpu => Some(MonitorType::NodeCpuUtilization),
            SampleKind::NodeMemory => Some(MonitorType::NodeMemoryUtilization),
            SampleKind::ContainerCpu => Some(MonitorType::ContainerCpuUtilization),
            SampleKind::ContainerMemory => Some(MonitorType::ContainerMemoryUtilization),
            SampleKind::Unrecognized => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::NodeCpu => "node_cpu",
            SampleKind::NodeMemory => "node_memory",
            SampleKind::ContainerCpu => "container_cpu",
            SampleKind::ContainerMemory => "container_memory",
            SampleKind::Unrecognized => "unrecognized",
        }
    }
}

/// Raw record as delivered by the collection pipeline
///
/// Every field is optional so a record with missing fields still
/// deserializes and can be rejected individually.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_items: Option<Vec<RawDataItem>>,
    /// Present on records that were already evaluated upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_labels: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawDataItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<RawCollection>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl RawRecord {
    /// Build a well-formed single-sample record
    pub fn sample(
        object_name: &str,
        counter_name: &str,
        value: f64,
        instance_name: &str,
        timestamp: &str,
    ) -> Self {
        Self {
            data_items: Some(vec![RawDataItem {
                object_name: Some(object_name.to_string()),
                timestamp: Some(timestamp.to_string()),
                instance_name: Some(instance_name.to_string()),
                collections: Some(vec![RawCollection {
                    counter_name: Some(counter_name.to_string()),
                    value: Some(value),
                }]),
            }]),
            monitor_labels: None,
        }
    }

    fn first_item(&self) -> Option<&RawDataItem> {
        self.data_items.as_ref().and_then(|items| items.first())
    }

    /// Object name of the first data item, if any
    pub fn object_name(&self) -> Option<&str> {
        self.first_item().and_then(|i| i.object_name.as_deref())
    }

    /// Counter name of the first collection of the first data item, if any
    pub fn counter_name(&self) -> Option<&str> {
        self.first_item()
            .and_then(|i| i.collections.as_ref())
            .and_then(|c| c.first())
            .and_then(|c| c.counter_name.as_deref())
    }

    /// Instance name of the first data item, if any
    pub fn instance_name(&self) -> Option<&str> {
        self.first_item().and_then(|i| i.instance_name.as_deref())
    }
}

/// One record read from the collection pipeline
#[derive(Debug, Clone)]
pub enum InputRecord {
    /// Raw sample to classify
    Sample(RawRecord),
    /// Record that already carries `MonitorLabels`; forwarded untouched
    Evaluated(serde_json::Value),
}

/// Parse one JSON line holding either a single record or an array of them.
///
/// The outer error means the line is not JSON at all. Each record of an
/// array is decoded on its own, so one bad record leaves its siblings intact.
pub fn parse_input_line(
    line: &str,
) -> Result<Vec<Result<InputRecord, serde_json::Error>>, serde_json::Error> {
    let values = match serde_json::from_str::<serde_json::Value>(line)? {
        serde_json::Value::Array(values) => values,
        value => vec![value],
    };

    Ok(values.into_iter().map(parse_input_record).collect())
}

fn parse_input_record(value: serde_json::Value) -> Result<InputRecord, serde_json::Error> {
    if value.get("MonitorLabels").is_some() {
        Ok(InputRecord::Evaluated(value))
    } else {
        serde_json::from_value(value).map(InputRecord::Sample)
    }
}

/// One validated observation of a counter
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub kind: SampleKind,
    pub object_name: String,
    /// Lowercased counter name
    pub counter_name: String,
    pub value: f64,
    pub instance_name: String,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Validate the first data item of a raw record. Only `DataItems[0]` and
    /// its first collection are read.
    pub fn from_record(record: &RawRecord) -> Result<Self, ClassifyError> {
        let item = record.first_item().ok_or(ClassifyError::EmptyRecord)?;

        let object_name = item
            .object_name
            .as_deref()
            .ok_or(ClassifyError::MissingField("ObjectName"))?;
        let collection = item
            .collections
            .as_ref()
            .and_then(|c| c.first())
            .ok_or(ClassifyError::MissingField("Collections"))?;
        let counter_name = collection
            .counter_name
            .as_deref()
            .ok_or(ClassifyError::MissingField("CounterName"))?;
        let value = collection
            .value
            .ok_or(ClassifyError::MissingField("Value"))?;
        if !value.is_finite() {
            return Err(ClassifyError::InvalidValue(value));
        }
        let instance_name = item
            .instance_name
            .as_deref()
            .ok_or(ClassifyError::MissingField("InstanceName"))?;
        let raw_timestamp = item
            .timestamp
            .as_deref()
            .ok_or(ClassifyError::MissingField("Timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
            .map_err(|source| ClassifyError::InvalidTimestamp {
                value: raw_timestamp.to_string(),
                source,
            })?
            .with_timezone(&Utc);

        Ok(Self {
            kind: SampleKind::resolve(object_name, counter_name),
            object_name: object_name.to_string(),
            counter_name: counter_name.to_ascii_lowercase(),
            value,
            instance_name: instance_name.to_string(),
            timestamp,
        })
    }
}

/// Result of evaluating one sample against its monitor's thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    pub timestamp: DateTime<Utc>,
    pub state: HealthState,
    pub details: Details,
}

/// A state change surfaced to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthRecord {
    pub monitor_instance_id: MonitorInstanceId,
    pub monitor_type: MonitorType,
    pub timestamp: DateTime<Utc>,
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<HealthState>,
    pub details: Details,
    pub labels: MonitorDimensions,
}
