//! Monitor status from a running agent

use anyhow::Result;
use colored::Colorize;
use health_core::{HealthState, MonitorSummary, MonitorType};
use serde::Serialize;
use tabled::Tabled;

use crate::client::AgentClient;
use crate::output::{
    color_component, color_state, format_timestamp, format_utilization, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct MonitorRow {
    #[tabled(rename = "Monitor")]
    monitor_type: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Last Observed")]
    last_observed: String,
    #[tabled(rename = "Samples")]
    observations: u64,
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    agent_status: Option<health_core::ComponentStatus>,
    monitors: &'a [MonitorSummary],
}

/// Show monitor instances, optionally filtered by state and monitor type
pub async fn show_status(
    client: &AgentClient,
    state: Option<String>,
    monitor_type: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let state: Option<HealthState> = state
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .transpose()?;
    let monitor_type: Option<MonitorType> = monitor_type.map(|t| t.parse()).transpose()?;

    let liveness = client.liveness().await.ok();
    let monitors = filter_monitors(client.monitors().await?, state, monitor_type);

    match format {
        OutputFormat::Json => {
            print_json(&StatusOutput {
                agent_status: liveness.as_ref().map(|l| l.status),
                monitors: &monitors,
            })?;
        }
        OutputFormat::Table => {
            println!("{}", "Node Health".bold());
            println!("{}", "=".repeat(60));
            match &liveness {
                Some(report) => {
                    println!("Agent:    {}", color_component(report.status));
                    for (name, component) in &report.components {
                        let message = component.message.as_deref().unwrap_or("");
                        println!(
                            "  {:<16} {} {}",
                            name,
                            color_component(component.status),
                            message.dimmed()
                        );
                    }
                }
                None => print_warning("Agent liveness unavailable"),
            }
            println!();

            if monitors.is_empty() {
                print_warning("No monitor instances found");
                return Ok(());
            }

            let rows: Vec<MonitorRow> = monitors.iter().map(monitor_row).collect();
            print_table(rows);
            println!("\nTotal: {} monitor instances", monitors.len());
        }
    }

    Ok(())
}

fn filter_monitors(
    monitors: Vec<MonitorSummary>,
    state: Option<HealthState>,
    monitor_type: Option<MonitorType>,
) -> Vec<MonitorSummary> {
    monitors
        .into_iter()
        .filter(|m| state.map_or(true, |s| m.state == s))
        .filter(|m| monitor_type.map_or(true, |t| m.monitor_type == t))
        .collect()
}

/// Container key for container monitors, node name otherwise
fn entity_name(summary: &MonitorSummary) -> String {
    summary
        .labels
        .get("container_key")
        .or_else(|| summary.labels.get("node_name"))
        .unwrap_or("-")
        .to_string()
}

fn monitor_row(summary: &MonitorSummary) -> MonitorRow {
    MonitorRow {
        monitor_type: summary.monitor_type.to_string(),
        entity: entity_name(summary),
        state: color_state(summary.state),
        utilization: format_utilization(&summary.details),
        last_observed: format_timestamp(&summary.last_observed_at),
        observations: summary.observation_count,
    }
}
