//! Line-oriented record pipeline
//!
//! Reads raw sample records as JSON lines, classifies them in batches and
//! writes emitted health records as JSON lines. Records that already carry
//! monitor labels are forwarded unchanged. A malformed line or record is
//! reported and skipped; it never stops the stream.

use anyhow::{Context, Result};
use health_core::telemetry::TelemetrySink;
use health_core::{IntakeStats, RawRecord, RecordIntake, SampleClassifier};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    #[serde(flatten)]
    pub intake: IntakeStats,
    pub emitted: u64,
    pub batches: u64,
}

pub struct Pipeline<'a> {
    classifier: &'a SampleClassifier,
    telemetry: &'a dyn TelemetrySink,
    batch_size: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        classifier: &'a SampleClassifier,
        telemetry: &'a dyn TelemetrySink,
        batch_size: usize,
    ) -> Self {
        Self {
            classifier,
            telemetry,
            batch_size: batch_size.max(1),
        }
    }

    /// Process `reader` until end of input
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<PipelineStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = PipelineStats::default();
        let mut intake = RecordIntake::new(self.telemetry, self.batch_size);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.context("Failed to read input")? {
            for value in intake.push_line(&line) {
                write_line(&mut writer, &value).await?;
            }
            if let Some(batch) = intake.take_full_batch() {
                self.flush(&batch, &mut writer, &mut stats).await?;
            }
        }

        if let Some(batch) = intake.take_remaining() {
            self.flush(&batch, &mut writer, &mut stats).await?;
        }
        writer.flush().await.context("Failed to flush output")?;

        stats.intake = intake.stats().clone();
        debug!(?stats, "Input exhausted");
        Ok(stats)
    }

    async fn flush<W>(
        &self,
        batch: &[RawRecord],
        writer: &mut W,
        stats: &mut PipelineStats,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let emitted = self.classifier.classify_batch(batch).await;
        stats.batches += 1;
        stats.emitted += emitted.len() as u64;

        for record in &emitted {
            write_line(writer, record).await?;
        }
        writer.flush().await.context("Failed to flush output")?;
        Ok(())
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).context("Failed to serialize record")?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .context("Failed to write output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use health_core::telemetry::TracingTelemetry;
    use health_core::{
        parse_metrics_to_collect, CapacityCache, ClusterIdentity, HealthRecord, HealthState,
        PolicyTable, StateStore, StaticClusterSource, DEFAULT_METRICS_TO_COLLECT,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn classifier() -> SampleClassifier {
        let identity = ClusterIdentity {
            cluster_id: "c1".to_string(),
            node_name: "n1".to_string(),
            region: None,
        };
        let telemetry = Arc::new(TracingTelemetry::disabled());
        let source = Arc::new(StaticClusterSource::new(identity.clone(), 4.0, 8e9));
        let cache = Arc::new(CapacityCache::new(
            source,
            "n1",
            Duration::from_secs(300),
            telemetry.clone(),
        ));
        SampleClassifier::new(
            identity,
            parse_metrics_to_collect(DEFAULT_METRICS_TO_COLLECT),
            Arc::new(PolicyTable::default()),
            cache,
            Arc::new(StateStore::new()),
            telemetry,
        )
    }

    fn sample_line(value: f64, ts: &str) -> String {
        serde_json::to_string(&RawRecord::sample(
            "K8SNode",
            "cpuUsageNanoCores",
            value,
            "n1",
            ts,
        ))
        .unwrap()
    }

    async fn run(input: &str, batch_size: usize) -> (PipelineStats, Vec<String>) {
        let classifier = classifier();
        let telemetry = TracingTelemetry::disabled();
        let pipeline = Pipeline::new(&classifier, &telemetry, batch_size);

        let mut output = Vec::new();
        let stats = pipeline.run(input.as_bytes(), &mut output).await.unwrap();
        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        (stats, lines)
    }

    #[tokio::test]
    async fn test_emits_baseline_and_corroborated_change() {
        let input = [
            sample_line(1e9, "2024-01-01T00:00:00Z"),
            sample_line(3.9e9, "2024-01-01T00:01:00Z"),
            sample_line(3.9e9, "2024-01-01T00:02:00Z"),
            sample_line(3.9e9, "2024-01-01T00:03:00Z"),
        ]
        .join("\n");

        let (stats, lines) = run(&input, 2).await;
        assert_eq!(stats.intake.samples, 4);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.emitted, 2);

        let records: Vec<HealthRecord> = lines
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records[0].state, HealthState::Healthy);
        assert_eq!(records[1].state, HealthState::Critical);
        assert_eq!(records[1].previous_state, Some(HealthState::Healthy));
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_stream() {
        let input = format!(
            "{}\n{{not json\n\n{}\n",
            sample_line(1e9, "2024-01-01T00:00:00Z"),
            r#"[{"DataItems": []}]"#
        );

        let (stats, lines) = run(&input, 64).await;
        assert_eq!(stats.intake.lines_read, 4);
        assert_eq!(stats.intake.malformed_lines, 1);
        assert_eq!(stats.intake.samples, 2);
        assert_eq!(stats.emitted, 1);
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_evaluated_records_are_forwarded() {
        let evaluated = r#"{"MonitorLabels":{"cluster_id":"c1"},"MonitorId":"node_cpu_utilization"}"#;
        let (stats, lines) = run(evaluated, 64).await;

        assert_eq!(stats.intake.forwarded, 1);
        assert_eq!(stats.intake.samples, 0);
        assert_eq!(stats.batches, 0);
        let forwarded: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(forwarded["MonitorId"], "node_cpu_utilization");
    }

    #[tokio::test]
    async fn test_bad_record_in_array_line_keeps_siblings() {
        let input = format!(
            "[{}, {{\"DataItems\":\"oops\"}}, {}]",
            sample_line(1e9, "2024-01-01T00:00:00Z"),
            r#"{"MonitorLabels":{"cluster_id":"c1"},"MonitorId":"node_cpu_utilization"}"#
        );

        let (stats, lines) = run(&input, 64).await;
        assert_eq!(stats.intake.malformed_lines, 0);
        assert_eq!(stats.intake.malformed_records, 1);
        assert_eq!(stats.intake.samples, 1);
        assert_eq!(stats.intake.forwarded, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(lines.len(), 2);

        let forwarded: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(forwarded["MonitorId"], "node_cpu_utilization");
        let baseline: HealthRecord = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(baseline.state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (stats, lines) = run("", 8).await;
        assert_eq!(stats, PipelineStats::default());
        assert!(lines.is_empty());
    }
}
