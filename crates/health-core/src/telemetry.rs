//! Operational telemetry sink
//!
//! Failure and heartbeat signals leave the core through [`TelemetrySink`].
//! Reports are fire-and-forget: a sink never blocks and never returns an
//! error to the caller.

use std::collections::BTreeMap;
use tracing::{info, warn};

/// Key/value properties attached to a telemetry report
pub type Properties = BTreeMap<String, String>;

pub const HEARTBEAT_EVENT: &str = "HeartBeatEvent";
pub const EXCEPTION_EVENT: &str = "ExceptionEvent";

const CLUSTER_TYPE_AKS: &str = "AKS";
const CLUSTER_TYPE_ACS: &str = "ACS";

/// Destination for operational events and exceptions
pub trait TelemetrySink: Send + Sync {
    fn report_exception(&self, error: &anyhow::Error, properties: &Properties);

    fn report_event(&self, name: &str, properties: &Properties);
}

/// Identity of the reporting agent, attached to every report
#[derive(Debug, Clone, Default)]
pub struct TelemetryContext {
    pub cluster_id: String,
    pub cluster_region: Option<String>,
    pub node_name: String,
    pub agent_version: String,
    /// Full resource id of a managed cluster, if any
    pub aks_resource_id: Option<String>,
}

impl TelemetryContext {
    /// Properties merged into every report.
    ///
    /// A managed cluster resource id has the shape
    /// `/subscriptions/<sub>/resourceGroups/<rg>/providers/<ns>/managedClusters/<name>`.
    pub fn common_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("ClusterId".to_string(), self.cluster_id.clone());
        props.insert("Computer".to_string(), self.node_name.clone());
        props.insert("AgentVersion".to_string(), self.agent_version.clone());
        props.insert(
            "Region".to_string(),
            self.cluster_region.clone().unwrap_or_default(),
        );

        match self.aks_resource_id.as_deref().filter(|id| !id.is_empty()) {
            Some(resource_id) => {
                let segments: Vec<&str> = resource_id.split('/').collect();
                let segment = |i: usize| segments.get(i).copied().unwrap_or_default().to_string();
                props.insert("ClusterType".to_string(), CLUSTER_TYPE_AKS.to_string());
                props.insert("AKS_RESOURCE_ID".to_string(), resource_id.to_string());
                props.insert("SubscriptionID".to_string(), segment(2));
                props.insert("ResourceGroupName".to_string(), segment(4));
                props.insert("ClusterName".to_string(), segment(8));
            }
            None => {
                props.insert("ClusterType".to_string(), CLUSTER_TYPE_ACS.to_string());
            }
        }
        props
    }
}

/// Sink that writes reports as structured `tracing` events
pub struct TracingTelemetry {
    common: Properties,
    enabled: bool,
}

impl TracingTelemetry {
    pub fn new(context: &TelemetryContext) -> Self {
        Self {
            common: context.common_properties(),
            enabled: true,
        }
    }

    /// Sink that drops every report
    pub fn disabled() -> Self {
        warn!("Telemetry is disabled");
        Self {
            common: Properties::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn merged(&self, properties: &Properties) -> Properties {
        let mut merged = self.common.clone();
        merged.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl TelemetrySink for TracingTelemetry {
    fn report_exception(&self, error: &anyhow::Error, properties: &Properties) {
        if !self.enabled {
            return;
        }
        warn!(
            event = "telemetry_exception",
            name = EXCEPTION_EVENT,
            error = %format!("{:#}", error),
            properties = ?self.merged(properties),
            "Exception reported"
        );
    }

    fn report_event(&self, name: &str, properties: &Properties) {
        if !self.enabled {
            return;
        }
        info!(
            event = "telemetry_event",
            name = %name,
            properties = ?self.merged(properties),
            "Event reported"
        );
    }
}
