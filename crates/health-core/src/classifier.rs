//! Sample classification entry point
//!
//! Takes one raw record from the collection pipeline through the whole
//! evaluation: dispatch on `(ObjectName, CounterName)`, capacity lookup,
//! threshold evaluation, identity resolution, state store update and signal
//! reduction. A failing record never affects the rest of its batch.

use crate::capacity::{CapacityCache, ClusterIdentity};
use crate::error::ClassifyError;
use crate::evaluator::{compute_state, observation_details, utilization_percent};
use crate::identity::{MonitorDimensions, MonitorInstance};
use crate::models::{HealthObservation, HealthRecord, MetricSample, MonitorType, RawRecord};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::policy::{MonitorPolicy, PolicyTable};
use crate::reducer::SignalReducer;
use crate::store::StateStore;
use crate::telemetry::{Properties, TelemetrySink};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Normalize a comma-separated counter list to a lowercase set
pub fn parse_metrics_to_collect(csv: &str) -> HashSet<String> {
    csv.split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Container key (`<pod uid>/<container name>`) from a composite instance
/// name: its last two non-empty `/`-separated segments
pub fn container_key_from_instance_name(instance_name: &str) -> Result<String, ClassifyError> {
    let segments: Vec<&str> = instance_name.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., pod, container] => Ok(format!("{}/{}", pod, container)),
        _ => Err(ClassifyError::InvalidInstanceName(instance_name.to_string())),
    }
}

pub struct SampleClassifier {
    identity: ClusterIdentity,
    metrics_to_collect: HashSet<String>,
    policies: Arc<PolicyTable>,
    cache: Arc<CapacityCache>,
    store: Arc<StateStore>,
    reducer: SignalReducer,
    telemetry: Arc<dyn TelemetrySink>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    /// Bands used for monitor types without a configured policy
    fallback_policy: MonitorPolicy,
}

impl SampleClassifier {
    pub fn new(
        identity: ClusterIdentity,
        metrics_to_collect: HashSet<String>,
        policies: Arc<PolicyTable>,
        cache: Arc<CapacityCache>,
        store: Arc<StateStore>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            logger: StructuredLogger::new(identity.node_name.clone()),
            identity,
            metrics_to_collect,
            policies,
            cache,
            store,
            reducer: SignalReducer::new(),
            telemetry,
            metrics: AgentMetrics::new(),
            fallback_policy: MonitorPolicy::default(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CapacityCache> {
        &self.cache
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    /// Monitor types that received samples without a configured policy
    pub fn missing_policies(&self) -> Vec<MonitorType> {
        self.reducer.missing_policies()
    }

    /// Classify one record, returning the emitted record if any.
    ///
    /// Errors are logged, counted and, for malformed records, reported to
    /// the telemetry sink; they never propagate.
    pub async fn classify(&self, record: &RawRecord) -> Option<HealthRecord> {
        let started = Instant::now();
        let result = self.try_classify(record).await;
        self.metrics
            .observe_classify_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(emitted) => emitted,
            Err(error) => {
                self.report_failure(record, error);
                None
            }
        }
    }

    /// Classify records in order; one failing record does not stop the rest
    pub async fn classify_batch(&self, records: &[RawRecord]) -> Vec<HealthRecord> {
        self.cache.refresh(Instant::now()).await;

        let mut emitted = Vec::new();
        for record in records {
            if let Some(health_record) = self.classify(record).await {
                emitted.push(health_record);
            }
        }
        self.logger.log_batch(records.len(), emitted.len());
        emitted
    }

    pub async fn try_classify(
        &self,
        record: &RawRecord,
    ) -> Result<Option<HealthRecord>, ClassifyError> {
        // Already evaluated upstream
        if record.monitor_labels.is_some() {
            return Ok(None);
        }

        let sample = MetricSample::from_record(record)?;
        self.metrics.inc_samples_processed(sample.kind.as_str());

        if !self.metrics_to_collect.contains(&sample.counter_name) {
            self.metrics.inc_samples_ignored();
            return Ok(None);
        }
        let Some(monitor_type) = sample.kind.monitor_type() else {
            debug!(
                object_name = %sample.object_name,
                counter_name = %sample.counter_name,
                "Ignoring unmonitored sample"
            );
            self.metrics.inc_samples_ignored();
            return Ok(None);
        };

        // Forces a query when capacity is still unresolved
        self.cache.refresh(Instant::now()).await;

        let container_key = if monitor_type.is_container_scoped() {
            Some(container_key_from_instance_name(&sample.instance_name)?)
        } else {
            None
        };

        let resource = monitor_type.resource();
        let limit = self.cache.effective_limit(container_key.as_deref(), resource);
        let percent = utilization_percent(sample.value, limit).ok_or_else(|| {
            ClassifyError::ZeroCapacity {
                resource: resource.as_str(),
                node: self.identity.node_name.clone(),
            }
        })?;

        let policy = self.policies.get(monitor_type);
        let observation = HealthObservation {
            timestamp: sample.timestamp,
            state: compute_state(monitor_type, percent, policy.unwrap_or(&self.fallback_policy)),
            details: observation_details(resource, sample.value, percent),
        };

        let dimensions = match container_key {
            Some(key) => MonitorDimensions::container(
                &self.identity.cluster_id,
                &self.identity.node_name,
                key,
            ),
            None => MonitorDimensions::node(&self.identity.cluster_id, &self.identity.node_name),
        };
        let instance = MonitorInstance::resolve(monitor_type, dimensions);

        let emitted = {
            let mut guard = self.store.lock(&instance).await;
            guard.update(observation, policy)?;
            self.reducer.reduce(&mut guard, policy)
        };

        match &emitted {
            Some(health_record) => {
                self.metrics
                    .inc_records_emitted(monitor_type.as_str(), health_record.state);
                self.logger.log_state_transition(health_record);
            }
            None => self.metrics.inc_observations_suppressed(monitor_type.as_str()),
        }
        self.metrics.set_monitor_instances(self.store.len() as i64);

        Ok(emitted)
    }

    fn report_failure(&self, record: &RawRecord, error: ClassifyError) {
        self.metrics.inc_malformed(error.kind());

        let mut properties = Properties::new();
        properties.insert("errorKind".to_string(), error.kind().to_string());
        for (key, value) in [
            ("objectName", record.object_name()),
            ("counterName", record.counter_name()),
            ("instanceName", record.instance_name()),
        ] {
            if let Some(value) = value {
                properties.insert(key.to_string(), value.to_string());
            }
        }

        warn!(
            error = %error,
            error_kind = error.kind(),
            object_name = ?record.object_name(),
            counter_name = ?record.counter_name(),
            instance_name = ?record.instance_name(),
            "Discarding sample"
        );

        if error.is_malformed() {
            self.telemetry
                .report_exception(&anyhow::Error::new(error), &properties);
        }
    }
}
