//! Policy file commands

use anyhow::{Context, Result};
use colored::Colorize;
use health_core::{MonitorPolicy, PolicyTable, ReductionStrategy, ThresholdBand};
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_state, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Monitor")]
    monitor: String,
    #[tabled(rename = "Bands")]
    bands: String,
    #[tabled(rename = "Reduction")]
    reduction: String,
}

/// Parse and validate a policy file
pub fn validate_policy(path: &Path, format: OutputFormat) -> Result<()> {
    let table = PolicyTable::from_path(path)
        .with_context(|| format!("Invalid policy file {}", path.display()))?;

    match format {
        OutputFormat::Json => println!("{}", table.to_json_pretty()?),
        OutputFormat::Table => {
            print_success(&format!("{} is valid", path.display()));
            print_policies(&table);
        }
    }
    Ok(())
}

pub fn show_defaults(format: OutputFormat) -> Result<()> {
    let table = PolicyTable::default();
    match format {
        OutputFormat::Json => println!("{}", table.to_json_pretty()?),
        OutputFormat::Table => {
            println!("{}", "Default Policies".bold());
            print_policies(&table);
        }
    }
    Ok(())
}

fn print_policies(table: &PolicyTable) {
    let rows: Vec<PolicyRow> = table
        .iter()
        .map(|(monitor, policy)| PolicyRow {
            monitor: monitor.to_string(),
            bands: format_bands(&policy.bands),
            reduction: format_reduction(policy),
        })
        .collect();
    if !rows.is_empty() {
        print_table(rows);
    }

    let missing = table.missing();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|t| t.as_str()).collect();
        print_warning(&format!(
            "No policy for {}; these monitors emit every observation",
            names.join(", ")
        ));
    }
}

fn format_bands(bands: &[ThresholdBand]) -> String {
    bands
        .iter()
        .map(|band| match band.up_to {
            Some(up_to) => format!("{} ≤ {}%", color_state(band.state), up_to),
            None => format!("{} above", color_state(band.state)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_reduction(policy: &MonitorPolicy) -> String {
    match policy.reduction {
        ReductionStrategy::ConsecutiveSamples { count } => format!("{} consecutive samples", count),
        ReductionStrategy::SustainedFor { seconds } => format!("sustained {}s", seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_policy_columns() {
        colored::control::set_override(false);
        let policy = MonitorPolicy::default();
        assert_eq!(
            format_bands(&policy.bands),
            "healthy ≤ 80%, warning ≤ 90%, critical above"
        );
        assert_eq!(format_reduction(&policy), "3 consecutive samples");

        let sustained = MonitorPolicy::warning_critical(
            70.0,
            95.0,
            ReductionStrategy::SustainedFor { seconds: 300 },
        );
        assert_eq!(format_reduction(&sustained), "sustained 300s");
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"monitors": {{"node_cpu_utilization": {{"bands": []}}}}}}"#
        )
        .unwrap();

        let error = validate_policy(file.path(), OutputFormat::Json).unwrap_err();
        assert!(format!("{:#}", error).contains("no threshold bands"));
    }

    #[test]
    fn test_validate_accepts_good_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"monitors": {{"container_memory_utilization": {{
                "bands": [{{"state": "healthy", "up_to": 85.0}}, {{"state": "critical"}}],
                "reduction": {{"strategy": "sustained_for", "seconds": 120}}
            }}}}}}"#
        )
        .unwrap();

        assert!(validate_policy(file.path(), OutputFormat::Json).is_ok());
    }
}
