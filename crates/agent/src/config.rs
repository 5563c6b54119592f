//! Agent configuration

use anyhow::{bail, Context, Result};
use health_core::capacity::DEFAULT_REFRESH_INTERVAL;
use health_core::{
    ClusterIdentity, PolicyTable, StaticClusterSource, TelemetryContext,
    DEFAULT_METRICS_TO_COLLECT,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_ENV: &str = "AGENT_CONFIG_FILE";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    #[serde(default)]
    pub cluster_region: Option<String>,

    /// Resource id of a managed cluster, if the node belongs to one
    #[serde(default)]
    pub aks_resource_id: Option<String>,

    /// API server port for health/metrics/monitors
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Comma-separated counter names to evaluate
    #[serde(default = "default_metrics_to_collect")]
    pub metrics_to_collect: String,

    #[serde(default = "default_refresh_interval_minutes")]
    pub container_resource_refresh_interval_minutes: u64,

    /// Policy file; the default policy table is used when unset
    #[serde(default)]
    pub policy_path: Option<PathBuf>,

    /// Node CPU capacity in cores; detected from the host when unset
    #[serde(default)]
    pub node_cpu_capacity_cores: Option<f64>,

    /// Node memory capacity in bytes; detected from the host when unset
    #[serde(default)]
    pub node_memory_capacity_bytes: Option<f64>,

    /// JSON file of per-container limits
    #[serde(default)]
    pub container_limits_path: Option<PathBuf>,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Records per classifier batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub disable_telemetry: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_cluster_id() -> String {
    std::env::var("CLUSTER_ID").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_metrics_to_collect() -> String {
    DEFAULT_METRICS_TO_COLLECT.to_string()
}

fn default_refresh_interval_minutes() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_secs() / 60
}

fn default_heartbeat_interval() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    64
}

impl AgentConfig {
    /// Load configuration from environment (prefix `AGENT_`) and an optional
    /// file named by `AGENT_CONFIG_FILE`. Environment wins over the file.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("AGENT").try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.container_resource_refresh_interval_minutes == 0 {
            bail!("container_resource_refresh_interval_minutes must be at least 1");
        }
        if self.heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.container_resource_refresh_interval_minutes * 60)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity {
            cluster_id: self.cluster_id.clone(),
            node_name: self.node_name.clone(),
            region: self.cluster_region.clone(),
        }
    }

    pub fn telemetry_context(&self, agent_version: &str) -> TelemetryContext {
        TelemetryContext {
            cluster_id: self.cluster_id.clone(),
            cluster_region: self.cluster_region.clone(),
            node_name: self.node_name.clone(),
            agent_version: agent_version.to_string(),
            aks_resource_id: self.aks_resource_id.clone(),
        }
    }

    pub fn load_policies(&self) -> Result<PolicyTable> {
        match &self.policy_path {
            Some(path) => PolicyTable::from_path(path)
                .with_context(|| format!("Failed to load policy file {}", path.display())),
            None => Ok(PolicyTable::default()),
        }
    }

    /// Data source for node capacity and container limits
    pub fn cluster_source(&self) -> StaticClusterSource {
        let cpu_cores = self
            .node_cpu_capacity_cores
            .unwrap_or_else(detect_cpu_cores);
        let memory_bytes = self
            .node_memory_capacity_bytes
            .unwrap_or_else(detect_memory_bytes);

        let source = StaticClusterSource::new(self.identity(), cpu_cores, memory_bytes);
        match &self.container_limits_path {
            Some(path) => source.with_limits_file(path),
            None => source,
        }
    }
}

fn detect_cpu_cores() -> f64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(0.0)
}

/// `MemTotal` from /proc/meminfo, or zero when unavailable
fn detect_memory_bytes() -> f64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| parse_mem_total(&content))
        .unwrap_or(0.0)
}

fn parse_mem_total(meminfo: &str) -> Option<f64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn from_json(json: &str) -> AgentConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_json(r#"{"node_name": "n1", "cluster_id": "c1"}"#);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.metrics_to_collect, "cpuUsageNanoCores,memoryRssBytes");
        assert_eq!(config.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(3600));
        assert_eq!(config.batch_size, 64);
        assert!(!config.disable_telemetry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_batch() {
        let config = from_json(r#"{"batch_size": 0}"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_mem_total() {
        let meminfo = "MemTotal:       16384 kB\nMemFree:         1024 kB\n";
        assert_eq!(parse_mem_total(meminfo), Some(16384.0 * 1024.0));
        assert_eq!(parse_mem_total("MemFree: 1 kB"), None);
    }

    #[test]
    fn test_default_policies_without_path() {
        let config = from_json("{}");
        assert_eq!(config.load_policies().unwrap(), PolicyTable::default());
    }

    #[test]
    fn test_missing_policy_file_is_an_error() {
        let config = from_json(r#"{"policy_path": "/nonexistent/policy.json"}"#);
        tokio_test::assert_err!(config.load_policies());
    }

    #[tokio::test]
    async fn test_cluster_source_uses_configured_capacity() {
        use health_core::ClusterDataSource;

        let mut limits = tempfile::NamedTempFile::new().unwrap();
        write!(limits, r#"{{"pod-a/app": {{"cpu_cores": 1.0}}}}"#).unwrap();

        let mut config = from_json(
            r#"{"node_name": "n1", "node_cpu_capacity_cores": 2.0, "node_memory_capacity_bytes": 4096}"#,
        );
        config.container_limits_path = Some(limits.path().to_path_buf());

        let resources = config.cluster_source().node_resources("n1").await.unwrap();
        assert_eq!(resources.capacity.cpu_nanocores, 2e9);
        assert_eq!(resources.capacity.memory_bytes, 4096.0);
        assert_eq!(
            resources.container_limits["pod-a/app"].cpu_nanocores,
            Some(1e9)
        );
    }
}
