//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use health_core::evaluator::{
    DETAIL_CPU_UTILIZATION_PERCENTAGE, DETAIL_MEMORY_UTILIZATION_PERCENTAGE,
};
use health_core::{ComponentStatus, Details, HealthState};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn color_state(state: HealthState) -> String {
    match state {
        HealthState::Healthy => state.as_str().green().to_string(),
        HealthState::Warning => state.as_str().yellow().to_string(),
        HealthState::Critical => state.as_str().red().bold().to_string(),
    }
}

pub fn color_component(status: ComponentStatus) -> String {
    match status {
        ComponentStatus::Healthy => "healthy".green().to_string(),
        ComponentStatus::Degraded => "degraded".yellow().to_string(),
        ComponentStatus::Unhealthy => "unhealthy".red().to_string(),
    }
}

/// Utilization percentage carried in an observation's details, if any
pub fn format_utilization(details: &Details) -> String {
    details
        .get(DETAIL_CPU_UTILIZATION_PERCENTAGE)
        .or_else(|| details.get(DETAIL_MEMORY_UTILIZATION_PERCENTAGE))
        .map(|percent| format!("{:.1}%", percent))
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_utilization() {
        let mut details = Details::new();
        assert_eq!(format_utilization(&details), "-");

        details.insert(DETAIL_MEMORY_UTILIZATION_PERCENTAGE.to_string(), 91.34);
        assert_eq!(format_utilization(&details), "91.3%");
    }

    #[test]
    fn test_color_state_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_state(HealthState::Critical), "critical");
        assert_eq!(color_component(ComponentStatus::Degraded), "degraded");
    }
}
