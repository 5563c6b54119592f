//! Error types for policy loading, sample classification and state updates

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable monitor policy configuration
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown monitor type '{0}'")]
    UnknownMonitorType(String),

    #[error("{monitor}: no threshold bands configured")]
    NoBands { monitor: String },

    #[error("{monitor}: band {index} upper bound is not a number")]
    InvalidBound { monitor: String, index: usize },

    #[error("{monitor}: band {index} upper bound {up_to} must be greater than {previous}")]
    NonIncreasingBound {
        monitor: String,
        index: usize,
        up_to: f64,
        previous: f64,
    },

    #[error("{monitor}: band {index} is unbounded but is not the last band")]
    UnboundedBandNotLast { monitor: String, index: usize },

    #[error("{monitor}: last band must be unbounded to cover overflow")]
    BoundedLastBand { monitor: String },

    #[error("{monitor}: consecutive sample count must be at least 1")]
    ZeroSampleCount { monitor: String },

    #[error("{monitor}: sustained duration must be at least 1 second")]
    ZeroDuration { monitor: String },

    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rejected state store update
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("observation at {observed} for {instance_id} is older than the latest at {latest}")]
    OutOfOrder {
        instance_id: String,
        observed: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Reasons a single sample could not be evaluated
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("record has no data items")]
    EmptyRecord,

    #[error("data item is missing {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("metric value {0} is not a finite number")]
    InvalidValue(f64),

    #[error("cannot derive container key from instance name '{0}'")]
    InvalidInstanceName(String),

    #[error("{resource} capacity for node {node} is zero")]
    ZeroCapacity { resource: &'static str, node: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClassifyError {
    /// Short label used for metrics and telemetry properties
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifyError::EmptyRecord => "empty_record",
            ClassifyError::MissingField(_) => "missing_field",
            ClassifyError::InvalidTimestamp { .. } => "invalid_timestamp",
            ClassifyError::InvalidValue(_) => "invalid_value",
            ClassifyError::InvalidInstanceName(_) => "invalid_instance_name",
            ClassifyError::ZeroCapacity { .. } => "zero_capacity",
            ClassifyError::Store(StoreError::OutOfOrder { .. }) => "out_of_order",
        }
    }

    /// True when the record itself was malformed, as opposed to unevaluable
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            ClassifyError::ZeroCapacity { .. } | ClassifyError::Store(_)
        )
    }
}
