//! Offline replay of recorded samples
//!
//! Feeds a JSON-lines file through the same classifier the agent runs,
//! against static capacity, and prints the records it would have emitted.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use health_core::{
    parse_metrics_to_collect, CapacityCache, ClusterIdentity, HealthRecord, IntakeStats,
    PolicyTable, RecordIntake, SampleClassifier, StateStore, StaticClusterSource,
    TracingTelemetry, DEFAULT_METRICS_TO_COLLECT,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;

use crate::output::{
    color_state, format_timestamp, format_utilization, print_info, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// JSON-lines file of raw sample records
    pub file: PathBuf,

    /// Policy file (built-in defaults when omitted)
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Node CPU capacity in cores
    #[arg(long, default_value_t = 4.0)]
    pub cpu_cores: f64,

    /// Node memory capacity in bytes
    #[arg(long, default_value_t = 8.0 * 1024.0 * 1024.0 * 1024.0)]
    pub memory_bytes: f64,

    /// JSON file of per-container limits
    #[arg(long)]
    pub container_limits: Option<PathBuf>,

    #[arg(long, default_value = "replay")]
    pub cluster_id: String,

    /// Node name the samples were collected on
    #[arg(long, default_value = "replay-node")]
    pub node_name: String,

    /// Comma-separated counter names to evaluate
    #[arg(long, default_value = DEFAULT_METRICS_TO_COLLECT)]
    pub metrics: String,

    /// Records per classifier batch
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

/// Result of one replay run
#[derive(Debug, Default, Serialize)]
pub struct ReplayReport {
    #[serde(flatten)]
    pub intake: IntakeStats,
    pub emitted: Vec<HealthRecord>,
}

#[derive(Tabled)]
struct EmittedRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Monitor")]
    monitor_type: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "From")]
    previous: String,
    #[tabled(rename = "To")]
    state: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
}

pub async fn run_replay(args: &ReplayArgs, format: OutputFormat) -> Result<()> {
    let input = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let policies = load_policies(args.policy.as_deref())?;

    let report = replay(args, policies, &input).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn load_policies(path: Option<&Path>) -> Result<PolicyTable> {
    match path {
        Some(path) => PolicyTable::from_path(path)
            .with_context(|| format!("Invalid policy file {}", path.display())),
        None => Ok(PolicyTable::default()),
    }
}

/// Classify every sample in `input`, batch by batch, in file order
pub async fn replay(args: &ReplayArgs, policies: PolicyTable, input: &str) -> ReplayReport {
    let identity = ClusterIdentity {
        cluster_id: args.cluster_id.clone(),
        node_name: args.node_name.clone(),
        region: None,
    };
    let telemetry = Arc::new(TracingTelemetry::disabled());

    let mut source = StaticClusterSource::new(identity.clone(), args.cpu_cores, args.memory_bytes);
    if let Some(path) = &args.container_limits {
        source = source.with_limits_file(path);
    }
    let cache = Arc::new(CapacityCache::new(
        Arc::new(source),
        args.node_name.clone(),
        Duration::from_secs(3600),
        telemetry.clone(),
    ));

    let classifier = SampleClassifier::new(
        identity,
        parse_metrics_to_collect(&args.metrics),
        Arc::new(policies),
        cache,
        Arc::new(StateStore::new()),
        telemetry.clone(),
    );

    let mut report = ReplayReport::default();
    let mut intake = RecordIntake::new(telemetry.as_ref(), args.batch_size);

    for line in input.lines() {
        // Evaluated records are only counted here
        intake.push_line(line);
        if let Some(batch) = intake.take_full_batch() {
            report.emitted.extend(classifier.classify_batch(&batch).await);
        }
    }
    if let Some(batch) = intake.take_remaining() {
        report.emitted.extend(classifier.classify_batch(&batch).await);
    }

    report.intake = intake.stats().clone();
    report
}

fn print_report(report: &ReplayReport) {
    println!("{}", "Replay Summary".bold());
    println!("{}", "=".repeat(50));
    let stats = &report.intake;
    println!("Lines:            {}", stats.lines_read);
    println!("Samples:          {}", stats.samples);
    println!("Already evaluated: {}", stats.forwarded);
    println!("State changes:    {}", report.emitted.len().to_string().cyan());
    if stats.malformed_lines > 0 {
        print_warning(&format!("{} malformed lines skipped", stats.malformed_lines));
    }
    if stats.malformed_records > 0 {
        print_warning(&format!("{} malformed records skipped", stats.malformed_records));
    }
    println!();

    if report.emitted.is_empty() {
        print_info("No health records emitted");
        return;
    }

    let rows: Vec<EmittedRow> = report
        .emitted
        .iter()
        .map(|r| EmittedRow {
            timestamp: format_timestamp(&r.timestamp),
            monitor_type: r.monitor_type.to_string(),
            entity: r
                .labels
                .get("container_key")
                .or_else(|| r.labels.get("node_name"))
                .unwrap_or("-")
                .to_string(),
            previous: r
                .previous_state
                .map(color_state)
                .unwrap_or_else(|| "-".to_string()),
            state: color_state(r.state),
            utilization: format_utilization(&r.details),
        })
        .collect();
    print_table(rows);
}
