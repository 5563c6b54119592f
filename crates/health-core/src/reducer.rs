//! Signal reduction
//!
//! Turns the every-sample observation stream of a monitor instance into a
//! sparse stream of state transitions:
//!
//! - The first observation of an instance is always emitted (baseline).
//! - An observation matching the last emitted state is suppressed.
//! - A changed state is emitted only once corroborated, either by the newest
//!   `count` observations all agreeing, or by the new state holding for the
//!   configured duration.
//! - Without a policy every observation is emitted (fail-open), and the
//!   missing policy is logged once per monitor type.

use crate::models::{HealthObservation, HealthRecord, HealthState, MonitorType};
use crate::policy::{MonitorPolicy, ReductionStrategy};
use crate::store::{InstanceGuard, MonitorInstanceState};
use dashmap::DashSet;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Emit/suppress decision maker
#[derive(Default)]
pub struct SignalReducer {
    warned_missing: DashSet<MonitorType>,
}

impl SignalReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the instance's newest observation is a reportable
    /// change. Must be called with the same guard that performed the update,
    /// so the decision sees a fully updated instance.
    ///
    /// On emit, the instance's last-emitted state is updated before
    /// returning. An observation produces at most one record, however many
    /// times it is reduced.
    pub fn reduce(
        &self,
        guard: &mut InstanceGuard,
        policy: Option<&MonitorPolicy>,
    ) -> Option<HealthRecord> {
        let monitor_type = guard.instance().monitor_type;
        let state = guard.state_mut()?;
        if state.current_emitted() {
            return None;
        }

        let emit = match policy {
            None => {
                self.note_missing_policy(monitor_type);
                true
            }
            Some(policy) => should_emit(state, &policy.reduction),
        };

        if !emit {
            debug!(
                instance_id = %state.instance().id,
                state = %state.current().state,
                last_emitted = ?state.last_emitted(),
                "Observation suppressed"
            );
            return None;
        }

        let previous_state = state.last_emitted();
        let current = state.current().clone();
        state.mark_emitted(current.state, current.timestamp);

        Some(HealthRecord {
            monitor_instance_id: state.instance().id.clone(),
            monitor_type,
            timestamp: current.timestamp,
            state: current.state,
            previous_state,
            details: current.details,
            labels: state.instance().labels.clone(),
        })
    }

    /// Monitor types that have hit the fail-open path so far
    pub fn missing_policies(&self) -> Vec<MonitorType> {
        let mut missing: Vec<_> = self.warned_missing.iter().map(|t| *t).collect();
        missing.sort();
        missing
    }

    fn note_missing_policy(&self, monitor_type: MonitorType) {
        if self.warned_missing.insert(monitor_type) {
            warn!(
                monitor_type = %monitor_type,
                "No policy configured for monitor type, emitting every observation"
            );
        }
    }
}

fn should_emit(state: &MonitorInstanceState, reduction: &ReductionStrategy) -> bool {
    let newest = state.current().state;
    match state.last_emitted() {
        None => true,
        Some(last) if last == newest => false,
        Some(_) => is_corroborated(state.history(), newest, reduction),
    }
}

fn is_corroborated(
    history: &VecDeque<HealthObservation>,
    newest: HealthState,
    reduction: &ReductionStrategy,
) -> bool {
    match *reduction {
        ReductionStrategy::ConsecutiveSamples { count } => {
            let count = count.max(1);
            history.len() >= count && history.iter().rev().take(count).all(|o| o.state == newest)
        }
        ReductionStrategy::SustainedFor { seconds } => {
            let (Some(front), Some(back)) = (history.front(), history.back()) else {
                return false;
            };
            let held_for = back.timestamp - front.timestamp;
            history.iter().all(|o| o.state == newest)
                && held_for >= chrono::Duration::seconds(seconds as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use crate::testing::{container_instance, node_instance, observation};
    use HealthState::{Critical, Healthy, Warning};

    fn consecutive(count: usize) -> MonitorPolicy {
        MonitorPolicy::warning_critical(80.0, 90.0, ReductionStrategy::ConsecutiveSamples { count })
    }

    fn sustained(seconds: u64) -> MonitorPolicy {
        MonitorPolicy::warning_critical(80.0, 90.0, ReductionStrategy::SustainedFor { seconds })
    }

    /// Feed `states` one per minute and collect the emitted states
    async fn run(policy: Option<&MonitorPolicy>, states: &[HealthState]) -> Vec<Option<HealthState>> {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let instance = node_instance();

        let mut emitted = Vec::new();
        for (i, state) in states.iter().enumerate() {
            let mut guard = store.lock(&instance).await;
            guard.update(observation(i as i64 * 60, *state), policy).unwrap();
            emitted.push(reducer.reduce(&mut guard, policy).map(|r| r.state));
        }
        emitted
    }

    #[tokio::test]
    async fn test_first_observation_always_emitted() {
        for state in [Healthy, Warning, Critical] {
            assert_eq!(run(Some(&consecutive(5)), &[state]).await, vec![Some(state)]);
        }
    }

    #[tokio::test]
    async fn test_steady_state_is_not_reemitted() {
        let emitted = run(Some(&consecutive(3)), &[Healthy, Healthy, Healthy, Healthy]).await;
        assert_eq!(emitted, vec![Some(Healthy), None, None, None]);
    }

    #[tokio::test]
    async fn test_reduce_is_idempotent() {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let instance = node_instance();
        let policy = consecutive(1);

        let mut guard = store.lock(&instance).await;
        guard.update(observation(0, Warning), Some(&policy)).unwrap();
        assert!(reducer.reduce(&mut guard, Some(&policy)).is_some());
        assert!(reducer.reduce(&mut guard, Some(&policy)).is_none());
    }

    #[tokio::test]
    async fn test_change_emitted_once_after_n_consecutive() {
        let emitted = run(
            Some(&consecutive(3)),
            &[Healthy, Critical, Critical, Critical, Critical, Critical],
        )
        .await;
        assert_eq!(
            emitted,
            vec![Some(Healthy), None, None, Some(Critical), None, None]
        );
    }

    #[tokio::test]
    async fn test_interrupted_streak_restarts() {
        let emitted = run(
            Some(&consecutive(3)),
            &[Healthy, Warning, Warning, Healthy, Warning, Warning, Warning],
        )
        .await;
        assert_eq!(
            emitted,
            vec![Some(Healthy), None, None, None, None, None, Some(Warning)]
        );
    }

    #[tokio::test]
    async fn test_flap_back_to_emitted_state_is_suppressed() {
        let emitted = run(Some(&consecutive(2)), &[Healthy, Critical, Healthy, Critical, Healthy]).await;
        assert_eq!(emitted, vec![Some(Healthy), None, None, None, None]);
    }

    #[tokio::test]
    async fn test_mixed_new_states_need_agreement() {
        // Warning then Critical differ from each other, so neither is corroborated
        let emitted = run(Some(&consecutive(2)), &[Healthy, Warning, Critical, Critical]).await;
        assert_eq!(emitted, vec![Some(Healthy), None, None, Some(Critical)]);
    }

    #[tokio::test]
    async fn test_sustained_requires_duration() {
        // one observation per minute, state must hold for three minutes
        let emitted = run(
            Some(&sustained(180)),
            &[Healthy, Critical, Critical, Critical, Critical, Critical],
        )
        .await;
        assert_eq!(
            emitted,
            vec![Some(Healthy), None, None, None, Some(Critical), None]
        );
    }

    #[tokio::test]
    async fn test_sustained_reset_by_other_state() {
        let emitted = run(
            Some(&sustained(120)),
            &[Healthy, Warning, Warning, Healthy, Warning, Warning, Warning],
        )
        .await;
        assert_eq!(
            emitted,
            vec![Some(Healthy), None, None, None, None, None, Some(Warning)]
        );
    }

    #[tokio::test]
    async fn test_missing_policy_fails_open() {
        let emitted = run(None, &[Healthy, Healthy, Critical, Healthy]).await;
        assert_eq!(
            emitted,
            vec![Some(Healthy), Some(Healthy), Some(Critical), Some(Healthy)]
        );
    }

    #[tokio::test]
    async fn test_reduce_twice_emits_once() {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let instance = node_instance();
        let policy = consecutive(1);

        let mut guard = store.lock(&instance).await;
        guard.update(observation(0, Healthy), None).unwrap();
        assert_eq!(reducer.reduce(&mut guard, None).map(|r| r.state), Some(Healthy));
        assert!(reducer.reduce(&mut guard, None).is_none());
        drop(guard);

        let mut guard = store.lock(&instance).await;
        guard.update(observation(60, Critical), Some(&policy)).unwrap();
        let record = reducer.reduce(&mut guard, Some(&policy)).unwrap();
        assert_eq!(record.previous_state, Some(Healthy));
        assert!(reducer.reduce(&mut guard, Some(&policy)).is_none());
        assert_eq!(guard.state().unwrap().last_emitted(), Some(Critical));
    }

    #[tokio::test]
    async fn test_missing_policy_is_tracked_once() {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let instance = container_instance("pod-a/app");

        for i in 0..3 {
            let mut guard = store.lock(&instance).await;
            guard.update(observation(i, Healthy), None).unwrap();
            reducer.reduce(&mut guard, None);
        }
        assert_eq!(
            reducer.missing_policies(),
            vec![MonitorType::ContainerCpuUtilization]
        );
    }

    #[tokio::test]
    async fn test_record_carries_previous_state_and_labels() {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let instance = container_instance("pod-a/app");
        let policy = consecutive(1);

        let mut guard = store.lock(&instance).await;
        guard.update(observation(0, Healthy), Some(&policy)).unwrap();
        let first = reducer.reduce(&mut guard, Some(&policy)).unwrap();
        assert_eq!(first.previous_state, None);

        guard.update(observation(60, Critical), Some(&policy)).unwrap();
        let second = reducer.reduce(&mut guard, Some(&policy)).unwrap();
        assert_eq!(second.previous_state, Some(Healthy));
        assert_eq!(second.monitor_instance_id, instance.id);
        assert_eq!(second.labels.get("container_key"), Some("pod-a/app"));
        assert_eq!(
            guard.state().unwrap().last_emitted(),
            Some(Critical)
        );
    }

    #[tokio::test]
    async fn test_reduce_without_observation_returns_nothing() {
        let store = StateStore::new();
        let reducer = SignalReducer::new();
        let mut guard = store.lock(&node_instance()).await;
        assert!(reducer.reduce(&mut guard, Some(&consecutive(1))).is_none());
    }
}
