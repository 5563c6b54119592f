//! Per-monitor-instance state store
//!
//! Holds the latest observation, a bounded history and the last emitted state
//! for every monitor instance seen by this agent. Each instance sits behind
//! its own async mutex: callers take an [`InstanceGuard`] and hold it across
//! the update and the following reduction, so at most one update+reduce
//! sequence is in flight per instance while different instances proceed in
//! parallel.

use crate::error::StoreError;
use crate::identity::{MonitorDimensions, MonitorInstance, MonitorInstanceId};
use crate::models::{Details, HealthObservation, HealthState, MonitorType};
use crate::policy::{MonitorPolicy, ReductionStrategy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type InstanceSlot = Arc<Mutex<Option<MonitorInstanceState>>>;

/// Everything the store knows about one monitor instance
#[derive(Debug, Clone)]
pub struct MonitorInstanceState {
    instance: MonitorInstance,
    current: HealthObservation,
    history: VecDeque<HealthObservation>,
    last_emitted: Option<HealthState>,
    last_emitted_at: Option<DateTime<Utc>>,
    first_observed_at: DateTime<Utc>,
    observation_count: u64,
    // `observation_count` at the last emit
    emitted_observation: Option<u64>,
}

impl MonitorInstanceState {
    fn new(instance: MonitorInstance, observation: HealthObservation) -> Self {
        let mut history = VecDeque::new();
        history.push_back(observation.clone());
        Self {
            instance,
            first_observed_at: observation.timestamp,
            current: observation,
            history,
            last_emitted: None,
            last_emitted_at: None,
            observation_count: 1,
            emitted_observation: None,
        }
    }

    pub fn instance(&self) -> &MonitorInstance {
        &self.instance
    }

    /// Most recent observation
    pub fn current(&self) -> &HealthObservation {
        &self.current
    }

    /// Retained observations, oldest first; the newest is always `current`
    pub fn history(&self) -> &VecDeque<HealthObservation> {
        &self.history
    }

    pub fn last_emitted(&self) -> Option<HealthState> {
        self.last_emitted
    }

    pub fn last_emitted_at(&self) -> Option<DateTime<Utc>> {
        self.last_emitted_at
    }

    pub fn observation_count(&self) -> u64 {
        self.observation_count
    }

    fn record(
        &mut self,
        observation: HealthObservation,
        policy: Option<&MonitorPolicy>,
    ) -> Result<(), StoreError> {
        if observation.timestamp < self.current.timestamp {
            return Err(StoreError::OutOfOrder {
                instance_id: self.instance.id.to_string(),
                observed: observation.timestamp,
                latest: self.current.timestamp,
            });
        }

        self.history.push_back(observation.clone());
        self.current = observation;
        self.observation_count += 1;
        trim_history(&mut self.history, policy.map(|p| &p.reduction));
        Ok(())
    }

    pub(crate) fn mark_emitted(&mut self, state: HealthState, at: DateTime<Utc>) {
        self.last_emitted = Some(state);
        self.last_emitted_at = Some(at);
        self.emitted_observation = Some(self.observation_count);
    }

    /// Whether `current` has already produced a record
    pub(crate) fn current_emitted(&self) -> bool {
        self.emitted_observation == Some(self.observation_count)
    }

    fn summary(&self) -> MonitorSummary {
        MonitorSummary {
            instance_id: self.instance.id.clone(),
            monitor_type: self.instance.monitor_type,
            labels: self.instance.labels.clone(),
            state: self.current.state,
            last_emitted_state: self.last_emitted,
            last_observed_at: self.current.timestamp,
            last_emitted_at: self.last_emitted_at,
            first_observed_at: self.first_observed_at,
            observation_count: self.observation_count,
            details: self.current.details.clone(),
        }
    }
}

/// Drop observations the reduction strategy no longer needs.
///
/// Consecutive: keep the newest `count`. Sustained: keep everything newer than
/// `newest - window` plus the newest observation at or before that cutoff, so
/// the reducer can tell whether a run of states started early enough.
/// Without a policy only the newest observation is kept.
fn trim_history(history: &mut VecDeque<HealthObservation>, reduction: Option<&ReductionStrategy>) {
    match reduction {
        None => {
            while history.len() > 1 {
                history.pop_front();
            }
        }
        Some(ReductionStrategy::ConsecutiveSamples { count }) => {
            let keep = (*count).max(1);
            while history.len() > keep {
                history.pop_front();
            }
        }
        Some(ReductionStrategy::SustainedFor { seconds }) => {
            let Some(newest) = history.back().map(|o| o.timestamp) else {
                return;
            };
            let cutoff = newest - chrono::Duration::seconds(*seconds as i64);
            while history.len() >= 2 && history[1].timestamp <= cutoff {
                history.pop_front();
            }
        }
    }
}

/// Read-only view of one instance, as served by the `/monitors` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub instance_id: MonitorInstanceId,
    pub monitor_type: MonitorType,
    pub labels: MonitorDimensions,
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_emitted_state: Option<HealthState>,
    pub last_observed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_emitted_at: Option<DateTime<Utc>>,
    pub first_observed_at: DateTime<Utc>,
    pub observation_count: u64,
    pub details: Details,
}

/// Exclusive access to one instance's state
pub struct InstanceGuard {
    instance: MonitorInstance,
    slot: OwnedMutexGuard<Option<MonitorInstanceState>>,
}

impl InstanceGuard {
    pub fn instance(&self) -> &MonitorInstance {
        &self.instance
    }

    pub fn instance_id(&self) -> &MonitorInstanceId {
        &self.instance.id
    }

    /// `None` until the first observation has been stored
    pub fn state(&self) -> Option<&MonitorInstanceState> {
        self.slot.as_ref()
    }

    pub(crate) fn state_mut(&mut self) -> Option<&mut MonitorInstanceState> {
        self.slot.as_mut()
    }

    /// Store `observation` as the instance's current observation and append it
    /// to the bounded history. Creates the instance on first use.
    pub fn update(
        &mut self,
        observation: HealthObservation,
        policy: Option<&MonitorPolicy>,
    ) -> Result<(), StoreError> {
        match self.slot.as_mut() {
            Some(state) => state.record(observation, policy),
            None => {
                *self.slot = Some(MonitorInstanceState::new(self.instance.clone(), observation));
                Ok(())
            }
        }
    }
}

/// Concurrency-safe map from monitor instance id to instance state
///
/// Instances are never removed; cardinality is bounded by the entities on
/// this node.
#[derive(Default)]
pub struct StateStore {
    instances: DashMap<MonitorInstanceId, InstanceSlot>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance`
    pub async fn lock(&self, instance: &MonitorInstance) -> InstanceGuard {
        // Clone the slot out so the map shard is not held across the await
        let slot = self
            .instances
            .entry(instance.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        InstanceGuard {
            instance: instance.clone(),
            slot: slot.lock_owned().await,
        }
    }

    /// One-shot update of a single instance
    pub async fn update(
        &self,
        instance: &MonitorInstance,
        observation: HealthObservation,
        policy: Option<&MonitorPolicy>,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock(instance).await;
        guard.update(observation, policy)
    }

    /// Summary of a single instance, if it has been observed
    pub async fn summary(&self, id: &MonitorInstanceId) -> Option<MonitorSummary> {
        let slot = self.instances.get(id).map(|entry| entry.value().clone())?;
        let state = slot.lock().await;
        state.as_ref().map(MonitorInstanceState::summary)
    }

    /// Summaries of every observed instance, ordered by instance id
    pub async fn snapshot(&self) -> Vec<MonitorSummary> {
        let slots: Vec<InstanceSlot> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(state) = slot.lock().await.as_ref() {
                summaries.push(state.summary());
            }
        }
        summaries.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
