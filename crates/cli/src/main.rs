//! Node health agent CLI
//!
//! Queries monitor state from a running agent, replays recorded samples
//! through the evaluation core offline, and validates policy files.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{policy, replay, status};
use std::path::PathBuf;

/// Node health agent CLI
#[derive(Parser)]
#[command(name = "hmctl")]
#[command(author, version, about = "CLI for the Node Health Agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via HMCTL_AGENT_URL env var)
    #[arg(long, env = "HMCTL_AGENT_URL", default_value = "http://localhost:8080")]
    pub agent_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current state of every monitor instance on an agent
    Status {
        /// Filter by state (healthy, warning, critical)
        #[arg(long, short)]
        state: Option<String>,

        /// Filter by monitor type (e.g. container_cpu_utilization)
        #[arg(long, short)]
        monitor_type: Option<String>,
    },

    /// Evaluate a file of recorded samples offline
    Replay(replay::ReplayArgs),

    /// Policy file commands
    #[command(subcommand)]
    Policy(PolicyCommands),
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Check a policy file and print the resulting table
    Validate {
        /// Policy file path
        file: PathBuf,
    },

    /// Print the built-in default policies
    Defaults,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter("debug")
            .init();
    }

    match cli.command {
        Commands::Status {
            state,
            monitor_type,
        } => {
            let client = client::AgentClient::new(&cli.agent_url)?;
            status::show_status(&client, state, monitor_type, cli.format).await?;
        }
        Commands::Replay(args) => {
            replay::run_replay(&args, cli.format).await?;
        }
        Commands::Policy(policy_cmd) => match policy_cmd {
            PolicyCommands::Validate { file } => {
                policy::validate_policy(&file, cli.format)?;
            }
            PolicyCommands::Defaults => {
                policy::show_defaults(cli.format)?;
            }
        },
    }

    Ok(())
}
