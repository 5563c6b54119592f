//! Node capacity and container limit cache
//!
//! Capacity and limits come from an external [`ClusterDataSource`] and are
//! cached for a refresh interval. Readers always get the current snapshot
//! without waiting on a refresh in progress; refreshes are serialized
//! against each other and never retried internally.

use crate::models::{Resource, NANOCORES_PER_CORE};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::telemetry::{Properties, TelemetrySink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default refresh interval for capacity and limits (5 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub cluster_id: String,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Allocatable resources of the node; CPU in nanocores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub cpu_nanocores: f64,
    pub memory_bytes: f64,
}

impl NodeCapacity {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu_nanocores,
            Resource::Memory => self.memory_bytes,
        }
    }

    /// Both values known and positive
    pub fn is_resolved(&self) -> bool {
        self.cpu_nanocores > 0.0 && self.memory_bytes > 0.0
    }
}

/// Configured limits of one container; CPU in nanocores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerLimits {
    #[serde(default)]
    pub cpu_nanocores: Option<f64>,
    #[serde(default)]
    pub memory_bytes: Option<f64>,
}

impl ContainerLimits {
    pub fn get(&self, resource: Resource) -> Option<f64> {
        match resource {
            Resource::Cpu => self.cpu_nanocores,
            Resource::Memory => self.memory_bytes,
        }
    }
}

/// Result of one query against the data source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeResources {
    pub capacity: NodeCapacity,
    /// Keyed by container key (`<pod uid>/<container name>`)
    pub container_limits: HashMap<String, ContainerLimits>,
}

/// External source of cluster identity, node capacity and container limits
#[async_trait]
pub trait ClusterDataSource: Send + Sync {
    async fn cluster_identity(&self) -> Result<ClusterIdentity>;

    /// Capacity of `node_name` and the limits of every container on it
    async fn node_resources(&self, node_name: &str) -> Result<NodeResources>;
}

/// Ask `source` who this agent is, falling back to `configured` when it
/// cannot answer. The failure is reported and never stops startup.
pub async fn resolve_identity(
    source: &dyn ClusterDataSource,
    configured: ClusterIdentity,
    telemetry: &dyn TelemetrySink,
) -> ClusterIdentity {
    match source.cluster_identity().await {
        Ok(identity) => {
            info!(
                cluster_id = %identity.cluster_id,
                node_name = %identity.node_name,
                region = ?identity.region,
                "Resolved cluster identity"
            );
            identity
        }
        Err(error) => {
            warn!(
                error = %format!("{:#}", error),
                node_name = %configured.node_name,
                "Cluster identity unavailable, using configured values"
            );
            let mut properties = Properties::new();
            properties.insert("operation".to_string(), "cluster_identity".to_string());
            properties.insert("nodeName".to_string(), configured.node_name.clone());
            telemetry.report_exception(&error, &properties);
            configured
        }
    }
}

/// What a call to [`CapacityCache::refresh`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Cached data is within the refresh interval; no query was made
    Fresh,
    Refreshed,
    /// Query failed; previous values are kept
    Failed,
    /// Another refresh is running; cached values are served
    InFlight,
}

#[derive(Debug, Default)]
struct CacheSnapshot {
    capacity: NodeCapacity,
    limits: HashMap<String, ContainerLimits>,
    attempted_at: Option<Instant>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct CapacityCache {
    source: Arc<dyn ClusterDataSource>,
    node_name: String,
    refresh_interval: Duration,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    refresh_lock: Mutex<()>,
    telemetry: Arc<dyn TelemetrySink>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl CapacityCache {
    pub fn new(
        source: Arc<dyn ClusterDataSource>,
        node_name: impl Into<String>,
        refresh_interval: Duration,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let node_name = node_name.into();
        Self {
            source,
            logger: StructuredLogger::new(node_name.clone()),
            node_name,
            refresh_interval,
            snapshot: RwLock::new(Arc::new(CacheSnapshot::default())),
            refresh_lock: Mutex::new(()),
            telemetry,
            metrics: AgentMetrics::new(),
        }
    }

    fn current(&self) -> Arc<CacheSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, snapshot: CacheSnapshot) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(snapshot);
    }

    fn is_due(&self, snapshot: &CacheSnapshot, now: Instant) -> bool {
        if !snapshot.capacity.is_resolved() {
            return true;
        }
        match snapshot.attempted_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.refresh_interval,
        }
    }

    /// Query the data source if the interval has elapsed or capacity is
    /// still unresolved. Never fails: on error the previous values stay in
    /// place and the attempt time is stamped, so the next query waits for
    /// another interval. Unresolved capacity is retried on every call.
    pub async fn refresh(&self, now: Instant) -> RefreshOutcome {
        if !self.is_due(&self.current(), now) {
            return RefreshOutcome::Fresh;
        }

        let Ok(_refreshing) = self.refresh_lock.try_lock() else {
            debug!(node = %self.node_name, "Capacity refresh already in flight");
            return RefreshOutcome::InFlight;
        };

        // A refresh may have completed between the check and the lock
        let previous = self.current();
        if !self.is_due(&previous, now) {
            return RefreshOutcome::Fresh;
        }

        match self.source.node_resources(&self.node_name).await {
            Ok(resources) => {
                self.logger
                    .log_capacity_refreshed(&resources.capacity, resources.container_limits.len());
                self.metrics.inc_capacity_refreshes();
                self.replace(CacheSnapshot {
                    capacity: resources.capacity,
                    limits: resources.container_limits,
                    attempted_at: Some(now),
                    refreshed_at: Some(Utc::now()),
                });
                RefreshOutcome::Refreshed
            }
            Err(error) => {
                self.logger.log_capacity_refresh_failed(&error);
                self.metrics.inc_capacity_refresh_failures();

                let mut properties = Properties::new();
                properties.insert("operation".to_string(), "capacity_refresh".to_string());
                properties.insert("nodeName".to_string(), self.node_name.clone());
                self.telemetry.report_exception(&error, &properties);

                self.replace(CacheSnapshot {
                    capacity: previous.capacity,
                    limits: previous.limits.clone(),
                    attempted_at: Some(now),
                    refreshed_at: previous.refreshed_at,
                });
                RefreshOutcome::Failed
            }
        }
    }

    pub fn node_capacity(&self) -> NodeCapacity {
        self.current().capacity
    }

    pub fn container_limits(&self, container_key: &str) -> Option<ContainerLimits> {
        self.current().limits.get(container_key).copied()
    }

    /// Denominator for a utilization percentage: the container's own limit
    /// when set and positive, otherwise the node's capacity
    pub fn effective_limit(&self, container_key: Option<&str>, resource: Resource) -> f64 {
        let snapshot = self.current();
        container_key
            .and_then(|key| snapshot.limits.get(key))
            .and_then(|limits| limits.get(resource))
            .filter(|limit| *limit > 0.0)
            .unwrap_or_else(|| snapshot.capacity.get(resource))
    }

    /// Wall-clock time of the last successful refresh
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.current().refreshed_at
    }

    pub fn is_resolved(&self) -> bool {
        self.current().capacity.is_resolved()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

/// One entry of a container limits file
#[derive(Debug, Deserialize)]
struct LimitEntry {
    #[serde(default)]
    cpu_cores: Option<f64>,
    #[serde(default)]
    memory_bytes: Option<f64>,
}

/// Data source backed by agent configuration
///
/// Node capacity is fixed at construction. Container limits are read on
/// every query from an optional JSON file mapping container keys to
/// `{"cpu_cores": .., "memory_bytes": ..}`.
pub struct StaticClusterSource {
    identity: ClusterIdentity,
    capacity: NodeCapacity,
    limits_path: Option<PathBuf>,
}

impl StaticClusterSource {
    pub fn new(identity: ClusterIdentity, cpu_cores: f64, memory_bytes: f64) -> Self {
        Self {
            identity,
            capacity: NodeCapacity {
                cpu_nanocores: cpu_cores * NANOCORES_PER_CORE,
                memory_bytes,
            },
            limits_path: None,
        }
    }

    pub fn with_limits_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.limits_path = Some(path.into());
        self
    }

    async fn load_limits(&self) -> Result<HashMap<String, ContainerLimits>> {
        let Some(path) = &self.limits_path else {
            return Ok(HashMap::new());
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read container limits from {}", path.display()))?;
        let entries: HashMap<String, LimitEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid container limits file {}", path.display()))?;

        Ok(entries
            .into_iter()
            .map(|(key, entry)| {
                let limits = ContainerLimits {
                    cpu_nanocores: entry.cpu_cores.map(|cores| cores * NANOCORES_PER_CORE),
                    memory_bytes: entry.memory_bytes,
                };
                (key, limits)
            })
            .collect())
    }
}

#[async_trait]
impl ClusterDataSource for StaticClusterSource {
    async fn cluster_identity(&self) -> Result<ClusterIdentity> {
        Ok(self.identity.clone())
    }

    async fn node_resources(&self, node_name: &str) -> Result<NodeResources> {
        if node_name != self.identity.node_name {
            anyhow::bail!(
                "node {} is not served by this agent ({})",
                node_name,
                self.identity.node_name
            );
        }
        Ok(NodeResources {
            capacity: self.capacity,
            container_limits: self.load_limits().await?,
        })
    }
}
