//! Line intake for the record stream
//!
//! Turns JSON lines into batches of raw samples for the classifier and a
//! list of already-evaluated records to forward. A line that is not JSON, or
//! a single record inside an array line that cannot be decoded, is counted,
//! reported and skipped. Its siblings are still used.

use crate::models::{parse_input_line, InputRecord, RawRecord};
use crate::observability::AgentMetrics;
use crate::telemetry::{Properties, TelemetrySink};
use serde::Serialize;
use tracing::warn;

/// Counters for the lines and records read so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntakeStats {
    pub lines_read: u64,
    pub malformed_lines: u64,
    pub malformed_records: u64,
    pub samples: u64,
    pub forwarded: u64,
}

/// Splits input lines into classifier batches
pub struct RecordIntake<'a> {
    telemetry: &'a dyn TelemetrySink,
    batch_size: usize,
    pending: Vec<RawRecord>,
    stats: IntakeStats,
    metrics: AgentMetrics,
}

impl<'a> RecordIntake<'a> {
    pub fn new(telemetry: &'a dyn TelemetrySink, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            telemetry,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            stats: IntakeStats::default(),
            metrics: AgentMetrics::new(),
        }
    }

    /// Read one line, queueing its samples.
    ///
    /// Returns the records that already carry monitor labels, in line order.
    pub fn push_line(&mut self, line: &str) -> Vec<serde_json::Value> {
        self.stats.lines_read += 1;
        if line.trim().is_empty() {
            return Vec::new();
        }
        let line_number = self.stats.lines_read;

        let records = match parse_input_line(line) {
            Ok(records) => records,
            Err(error) => {
                self.stats.malformed_lines += 1;
                self.report(line_number, None, "malformed_line", error);
                return Vec::new();
            }
        };

        let mut forward = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            match record {
                Ok(InputRecord::Sample(raw)) => {
                    self.stats.samples += 1;
                    self.pending.push(raw);
                }
                Ok(InputRecord::Evaluated(value)) => {
                    self.stats.forwarded += 1;
                    forward.push(value);
                }
                Err(error) => {
                    self.stats.malformed_records += 1;
                    self.report(line_number, Some(index), "malformed_record", error);
                }
            }
        }
        forward
    }

    /// Take the queued samples once a full batch is waiting
    pub fn take_full_batch(&mut self) -> Option<Vec<RawRecord>> {
        if self.pending.len() >= self.batch_size {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Take whatever is still queued at end of input
    pub fn take_remaining(&mut self) -> Option<Vec<RawRecord>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.drain())
        }
    }

    pub fn stats(&self) -> &IntakeStats {
        &self.stats
    }

    fn drain(&mut self) -> Vec<RawRecord> {
        std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size))
    }

    fn report(&self, line: u64, index: Option<usize>, kind: &str, error: serde_json::Error) {
        match index {
            Some(index) => warn!(line, index, error = %error, "Skipping malformed record"),
            None => warn!(line, error = %error, "Skipping malformed input line"),
        }
        self.metrics.inc_malformed(kind);

        let mut properties = Properties::new();
        properties.insert("errorKind".to_string(), kind.to_string());
        properties.insert("line".to_string(), line.to_string());
        if let Some(index) = index {
            properties.insert("index".to_string(), index.to_string());
        }
        self.telemetry
            .report_exception(&anyhow::Error::new(error), &properties);
    }
}
