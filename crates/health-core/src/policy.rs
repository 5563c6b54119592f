//! Monitor policy configuration
//!
//! A policy pairs ordered threshold bands with a reduction strategy. Bands use
//! inclusive upper bounds: band `i` covers `(up_to[i-1], up_to[i]]`, so a value
//! sitting exactly on a boundary belongs to the lower band. The last band has
//! no upper bound and absorbs overflow.

use crate::error::PolicyError;
use crate::models::{HealthState, MonitorType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Default warning threshold (percent of capacity or limit)
pub const DEFAULT_WARNING_PERCENTAGE: f64 = 80.0;

/// Default critical threshold (percent of capacity or limit)
pub const DEFAULT_CRITICAL_PERCENTAGE: f64 = 90.0;

/// Default number of consecutive samples required to corroborate a change
pub const DEFAULT_CONSECUTIVE_SAMPLES: usize = 3;

/// One threshold band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub state: HealthState,
    /// Inclusive upper bound; `None` for the overflow band
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_to: Option<f64>,
}

impl ThresholdBand {
    pub fn up_to(state: HealthState, up_to: f64) -> Self {
        Self {
            state,
            up_to: Some(up_to),
        }
    }

    pub fn overflow(state: HealthState) -> Self {
        Self { state, up_to: None }
    }

    pub fn contains(&self, percent: f64) -> bool {
        self.up_to.map_or(true, |upper| percent <= upper)
    }
}

/// How a state change is corroborated before it is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReductionStrategy {
    /// The newest `count` observations must all share the new state
    ConsecutiveSamples { count: usize },
    /// The new state must have held for at least `seconds`
    SustainedFor { seconds: u64 },
}

impl ReductionStrategy {
    pub fn sustained_window(&self) -> Option<Duration> {
        match self {
            ReductionStrategy::SustainedFor { seconds } => Some(Duration::from_secs(*seconds)),
            ReductionStrategy::ConsecutiveSamples { .. } => None,
        }
    }
}

impl Default for ReductionStrategy {
    fn default() -> Self {
        ReductionStrategy::ConsecutiveSamples {
            count: DEFAULT_CONSECUTIVE_SAMPLES,
        }
    }
}

/// Threshold and reduction configuration for one monitor type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPolicy {
    pub bands: Vec<ThresholdBand>,
    #[serde(default)]
    pub reduction: ReductionStrategy,
}

impl MonitorPolicy {
    pub fn new(bands: Vec<ThresholdBand>, reduction: ReductionStrategy) -> Self {
        Self { bands, reduction }
    }

    /// Three-band policy: healthy up to `warning`, warning up to `critical`,
    /// critical above
    pub fn warning_critical(warning: f64, critical: f64, reduction: ReductionStrategy) -> Self {
        Self::new(
            vec![
                ThresholdBand::up_to(HealthState::Healthy, warning),
                ThresholdBand::up_to(HealthState::Warning, critical),
                ThresholdBand::overflow(HealthState::Critical),
            ],
            reduction,
        )
    }

    pub fn validate(&self, monitor: MonitorType) -> Result<(), PolicyError> {
        let name = || monitor.as_str().to_string();

        if self.bands.is_empty() {
            return Err(PolicyError::NoBands { monitor: name() });
        }

        let last = self.bands.len() - 1;
        let mut previous: Option<f64> = None;
        for (index, band) in self.bands.iter().enumerate() {
            match band.up_to {
                Some(up_to) if up_to.is_nan() => {
                    return Err(PolicyError::InvalidBound {
                        monitor: name(),
                        index,
                    });
                }
                Some(up_to) => {
                    if let Some(prev) = previous {
                        if up_to <= prev {
                            return Err(PolicyError::NonIncreasingBound {
                                monitor: name(),
                                index,
                                up_to,
                                previous: prev,
                            });
                        }
                    }
                    if index == last {
                        return Err(PolicyError::BoundedLastBand { monitor: name() });
                    }
                    previous = Some(up_to);
                }
                None if index != last => {
                    return Err(PolicyError::UnboundedBandNotLast {
                        monitor: name(),
                        index,
                    });
                }
                None => {}
            }
        }

        match self.reduction {
            ReductionStrategy::ConsecutiveSamples { count: 0 } => {
                Err(PolicyError::ZeroSampleCount { monitor: name() })
            }
            ReductionStrategy::SustainedFor { seconds: 0 } => {
                Err(PolicyError::ZeroDuration { monitor: name() })
            }
            _ => Ok(()),
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::warning_critical(
            DEFAULT_WARNING_PERCENTAGE,
            DEFAULT_CRITICAL_PERCENTAGE,
            ReductionStrategy::default(),
        )
    }
}

/// On-disk shape of a policy file
#[derive(Debug, Serialize, Deserialize)]
struct PolicyFile {
    monitors: BTreeMap<String, MonitorPolicy>,
}

/// Immutable table of policies keyed by monitor type, loaded once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    policies: HashMap<MonitorType, MonitorPolicy>,
}

impl PolicyTable {
    /// Table with no configured monitors
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Add or replace a policy after validating it
    pub fn with_policy(
        mut self,
        monitor: MonitorType,
        policy: MonitorPolicy,
    ) -> Result<Self, PolicyError> {
        policy.validate(monitor)?;
        self.policies.insert(monitor, policy);
        Ok(self)
    }

    pub fn get(&self, monitor: MonitorType) -> Option<&MonitorPolicy> {
        self.policies.get(&monitor)
    }

    /// Monitor types without a configured policy
    pub fn missing(&self) -> Vec<MonitorType> {
        MonitorType::ALL
            .into_iter()
            .filter(|t| !self.policies.contains_key(t))
            .collect()
    }

    /// Configured policies in monitor type order
    pub fn iter(&self) -> impl Iterator<Item = (MonitorType, &MonitorPolicy)> {
        let mut entries: Vec<_> = self.policies.iter().map(|(t, p)| (*t, p)).collect();
        entries.sort_by_key(|(t, _)| *t);
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = serde_json::from_str(json)?;

        let mut table = Self::empty();
        for (name, policy) in file.monitors {
            let monitor: MonitorType = name.parse()?;
            table = table.with_policy(monitor, policy)?;
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Serialize back to the policy file format
    pub fn to_json_pretty(&self) -> Result<String, PolicyError> {
        let file = PolicyFile {
            monitors: self
                .iter()
                .map(|(t, p)| (t.as_str().to_string(), p.clone()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: MonitorType::ALL
                .into_iter()
                .map(|t| (t, MonitorPolicy::default()))
                .collect(),
        }
    }
}
