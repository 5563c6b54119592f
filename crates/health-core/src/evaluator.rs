//! Threshold evaluation
//!
//! Pure functions mapping a utilization percentage and a monitor policy to a
//! health state, plus the detail payload attached to each observation.

use crate::models::{Details, HealthState, MonitorType, Resource, NANOCORES_PER_MILLICORE};
use crate::policy::MonitorPolicy;

pub const DETAIL_CPU_USAGE_MILLICORES: &str = "cpuUsageMillicores";
pub const DETAIL_CPU_UTILIZATION_PERCENTAGE: &str = "cpuUtilizationPercentage";
pub const DETAIL_MEMORY_RSS_BYTES: &str = "memoryRssBytes";
pub const DETAIL_MEMORY_UTILIZATION_PERCENTAGE: &str = "memoryUtilizationPercentage";

/// `value / capacity * 100`, rounded to two decimal places.
///
/// Returns `None` when the capacity is zero, negative or not finite, so the
/// caller never divides by zero.
pub fn utilization_percent(value: f64, capacity: f64) -> Option<f64> {
    if !capacity.is_finite() || capacity <= 0.0 {
        return None;
    }
    Some(round2(value / capacity * 100.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Map a percentage to the state of the first band that contains it.
///
/// Bands are inclusive at their upper bound, so a boundary value resolves to
/// the lower of the two adjacent bands. A validated policy always matches;
/// for an unvalidated one with no matching band the last band's state is
/// returned.
pub fn compute_state(monitor_type: MonitorType, percent: f64, policy: &MonitorPolicy) -> HealthState {
    let state = policy
        .bands
        .iter()
        .find(|band| band.contains(percent))
        .or_else(|| policy.bands.last())
        .map(|band| band.state)
        .unwrap_or(HealthState::Critical);

    tracing::trace!(
        monitor_type = %monitor_type,
        percent = percent,
        state = %state,
        "Computed monitor state"
    );

    state
}

pub fn nanocores_to_millicores(nanocores: f64) -> f64 {
    nanocores / NANOCORES_PER_MILLICORE
}

/// Detail payload for an observation of `resource`
pub fn observation_details(resource: Resource, value: f64, percent: f64) -> Details {
    let mut details = Details::new();
    match resource {
        Resource::Cpu => {
            details.insert(
                DETAIL_CPU_USAGE_MILLICORES.to_string(),
                nanocores_to_millicores(value),
            );
            details.insert(DETAIL_CPU_UTILIZATION_PERCENTAGE.to_string(), percent);
        }
        Resource::Memory => {
            details.insert(DETAIL_MEMORY_RSS_BYTES.to_string(), value);
            details.insert(DETAIL_MEMORY_UTILIZATION_PERCENTAGE.to_string(), percent);
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ReductionStrategy, ThresholdBand};

    fn policy() -> MonitorPolicy {
        MonitorPolicy::warning_critical(80.0, 90.0, ReductionStrategy::default())
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(utilization_percent(1.0, 3.0), Some(33.33));
        assert_eq!(utilization_percent(2.0, 3.0), Some(66.67));
        assert_eq!(utilization_percent(512.0, 1024.0), Some(50.0));
        assert_eq!(utilization_percent(3.0, 2.0), Some(150.0));
    }

    #[test]
    fn test_percent_guards_zero_capacity() {
        assert_eq!(utilization_percent(10.0, 0.0), None);
        assert_eq!(utilization_percent(10.0, -1.0), None);
        assert_eq!(utilization_percent(10.0, f64::NAN), None);
    }

    #[test]
    fn test_state_within_bands() {
        let monitor = MonitorType::NodeCpuUtilization;
        assert_eq!(compute_state(monitor, 0.0, &policy()), HealthState::Healthy);
        assert_eq!(compute_state(monitor, 42.5, &policy()), HealthState::Healthy);
        assert_eq!(compute_state(monitor, 85.0, &policy()), HealthState::Warning);
        assert_eq!(compute_state(monitor, 95.0, &policy()), HealthState::Critical);
        assert_eq!(compute_state(monitor, 250.0, &policy()), HealthState::Critical);
    }

    #[test]
    fn test_boundary_values_resolve_to_lower_band() {
        let monitor = MonitorType::ContainerMemoryUtilization;
        assert_eq!(compute_state(monitor, 80.0, &policy()), HealthState::Healthy);
        assert_eq!(compute_state(monitor, 80.01, &policy()), HealthState::Warning);
        assert_eq!(compute_state(monitor, 90.0, &policy()), HealthState::Warning);
        assert_eq!(compute_state(monitor, 90.01, &policy()), HealthState::Critical);
    }

    #[test]
    fn test_negative_percent_falls_in_first_band() {
        assert_eq!(
            compute_state(MonitorType::NodeMemoryUtilization, -5.0, &policy()),
            HealthState::Healthy
        );
    }

    #[test]
    fn test_every_percent_maps_to_its_band() {
        let p = policy();
        for step in 0..=12_000 {
            let percent = step as f64 / 100.0;
            let state = compute_state(MonitorType::NodeCpuUtilization, percent, &p);
            let expected = if percent <= 80.0 {
                HealthState::Healthy
            } else if percent <= 90.0 {
                HealthState::Warning
            } else {
                HealthState::Critical
            };
            assert_eq!(state, expected, "percent {}", percent);
        }
    }

    #[test]
    fn test_unvalidated_policy_falls_back_to_last_band() {
        let bounded = MonitorPolicy::new(
            vec![
                ThresholdBand::up_to(HealthState::Healthy, 50.0),
                ThresholdBand::up_to(HealthState::Warning, 60.0),
            ],
            ReductionStrategy::default(),
        );
        assert_eq!(
            compute_state(MonitorType::NodeCpuUtilization, 99.0, &bounded),
            HealthState::Warning
        );
    }

    #[test]
    fn test_cpu_details_in_millicores() {
        let details = observation_details(Resource::Cpu, 2_000_000_000.0, 50.0);
        assert_eq!(details[DETAIL_CPU_USAGE_MILLICORES], 2000.0);
        assert_eq!(details[DETAIL_CPU_UTILIZATION_PERCENTAGE], 50.0);
    }

    #[test]
    fn test_memory_details() {
        let details = observation_details(Resource::Memory, 1_048_576.0, 12.5);
        assert_eq!(details[DETAIL_MEMORY_RSS_BYTES], 1_048_576.0);
        assert_eq!(details[DETAIL_MEMORY_UTILIZATION_PERCENTAGE], 12.5);
        assert_eq!(details.len(), 2);
    }
}
