//! Liveness and readiness probes
//!
//! Tracks the health of the agent's own components (pipeline, capacity
//! cache, policy table) for the `/healthz` and `/readyz` endpoints.

use crate::capacity::RefreshOutcome;
use crate::models::MonitorType;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Probe component names
pub mod components {
    pub const PIPELINE: &str = "pipeline";
    pub const CAPACITY_CACHE: &str = "capacity_cache";
    pub const POLICY: &str = "policy";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operating on stale or partial data
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Worst status across components; empty is healthy
fn overall_status<'a>(healths: impl IntoIterator<Item = &'a ComponentHealth>) -> ComponentStatus {
    healths
        .into_iter()
        .map(|h| h.status)
        .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
            (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                ComponentStatus::Unhealthy
            }
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                ComponentStatus::Degraded
            }
            _ => ComponentStatus::Healthy,
        })
}

#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    initialized: Arc<RwLock<bool>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_initialized(&self, initialized: bool) {
        *self.initialized.write().await = initialized;
    }

    /// Fold a capacity refresh result into the `capacity_cache` component.
    ///
    /// Unresolved capacity makes every sample unevaluable, so it is unhealthy;
    /// a failed refresh over resolved capacity only degrades.
    pub async fn record_capacity(&self, outcome: RefreshOutcome, resolved: bool) {
        let health = match (resolved, outcome) {
            (false, _) => ComponentHealth::unhealthy("node capacity not resolved"),
            (true, RefreshOutcome::Failed) => {
                ComponentHealth::degraded("last refresh failed, serving cached values")
            }
            (true, _) => ComponentHealth::healthy(),
        };
        self.set(components::CAPACITY_CACHE, health).await;
    }

    /// Record which monitor types run without a configured policy
    pub async fn record_policy(&self, missing: &[MonitorType]) {
        let health = if missing.is_empty() {
            ComponentHealth::healthy()
        } else {
            let names: Vec<&str> = missing.iter().map(|t| t.as_str()).collect();
            ComponentHealth::degraded(format!("no policy for {}", names.join(", ")))
        };
        self.set(components::POLICY, health).await;
    }

    pub async fn liveness(&self) -> LivenessReport {
        let components = self.components.read().await.clone();
        LivenessReport {
            status: overall_status(components.values()),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessReport {
        if !*self.initialized.read().await {
            return ReadinessReport {
                ready: false,
                reason: Some("Agent not yet initialized".to_string()),
            };
        }

        let components = self.components.read().await;
        let unhealthy: Vec<&str> = components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessReport {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessReport {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_live_but_not_ready() {
        let probes = ProbeRegistry::new();

        let live = probes.liveness().await;
        assert_eq!(live.status, ComponentStatus::Healthy);
        assert!(live.components.is_empty());

        let ready = probes.readiness().await;
        assert!(!ready.ready);
        assert!(ready.reason.is_some());
    }

    #[tokio::test]
    async fn test_ready_after_initialization() {
        let probes = ProbeRegistry::new();
        probes.set(components::PIPELINE, ComponentHealth::healthy()).await;
        probes.set_initialized(true).await;

        assert!(probes.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_degraded_component_stays_ready() {
        let probes = ProbeRegistry::new();
        probes.set_initialized(true).await;
        probes.record_capacity(RefreshOutcome::Failed, true).await;

        assert_eq!(probes.liveness().await.status, ComponentStatus::Degraded);
        assert!(probes.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unresolved_capacity_is_not_ready() {
        let probes = ProbeRegistry::new();
        probes.set_initialized(true).await;
        probes.set(components::PIPELINE, ComponentHealth::healthy()).await;
        probes.record_capacity(RefreshOutcome::Refreshed, false).await;

        let live = probes.liveness().await;
        assert_eq!(live.status, ComponentStatus::Unhealthy);

        let ready = probes.readiness().await;
        assert!(!ready.ready);
        assert_eq!(
            ready.reason.as_deref(),
            Some("Unhealthy components: capacity_cache")
        );
    }

    #[tokio::test]
    async fn test_policy_component_lists_missing_monitors() {
        let probes = ProbeRegistry::new();
        probes
            .record_policy(&[MonitorType::NodeCpuUtilization, MonitorType::ContainerMemoryUtilization])
            .await;

        let live = probes.liveness().await;
        let policy = &live.components[components::POLICY];
        assert_eq!(policy.status, ComponentStatus::Degraded);
        assert_eq!(
            policy.message.as_deref(),
            Some("no policy for node_cpu_utilization, container_memory_utilization")
        );

        probes.record_policy(&[]).await;
        assert_eq!(probes.liveness().await.status, ComponentStatus::Healthy);
    }
}
