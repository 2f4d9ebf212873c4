//! Autoscaler CLI
//!
//! A command-line tool for inspecting the autoscaler daemon, following its
//! event log, scaling the fleet by hand and changing scaling configuration.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{config as remote_config, events, scale, status};
use output::OutputFormat;

/// Autoscaler CLI
#[derive(Parser)]
#[command(name = "asctl")]
#[command(author, version, about = "CLI for the Pipeline Autoscaler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via ASCTL_API_URL env var)
    #[arg(long, env = "ASCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format [default: table, or the config file's default_format]
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show manager status, fleet size and hourly cost
    Status,

    /// Show current metrics, forecast, model health and recent activity
    Metrics,

    /// List recent scaling events
    Events {
        /// Maximum number of events
        #[arg(long, short, default_value_t = 20)]
        limit: usize,

        /// Only events after this point (e.g. 30m, 6h, 2d or an RFC 3339 time)
        #[arg(long)]
        since: Option<String>,
    },

    /// Scale the fleet to a fixed number of instances
    Scale {
        /// Target instance count
        target: u32,

        /// Reason recorded with the execution
        #[arg(long, short, default_value = "manual scaling via asctl")]
        reason: String,
    },

    /// Show or change the scaling configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Save the API endpoint and default format to the local config file
    Use {
        /// API endpoint URL
        url: String,

        /// Default output format for later commands
        #[arg(long)]
        default_format: Option<OutputFormat>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the running configuration
    Show,

    /// Apply key=value changes (dotted keys nest, e.g. thresholds.scale_up.cpu_percent=85)
    Set {
        /// Assignments of the form key=value
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let local = config::Config::load()?;

    let format = cli.format.unwrap_or_else(|| {
        local
            .default_format
            .as_deref()
            .map(OutputFormat::from_name)
            .unwrap_or_default()
    });

    if let Commands::Use {
        url,
        default_format,
    } = &cli.command
    {
        // Validate before persisting
        client::ApiClient::new(url)?;
        let saved = config::Config {
            api_url: Some(url.clone()),
            default_format: default_format
                .map(|f| format!("{:?}", f).to_lowercase())
                .or(local.default_format.clone()),
        };
        let path = saved.save()?;
        output::print_success(&format!("Saved endpoint {} to {}", url, path.display()));
        return Ok(());
    }

    // Initialize client
    let client = client::ApiClient::new(&local.resolve_api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Metrics => status::show_metrics(&client, format).await?,
        Commands::Events { limit, since } => {
            events::show_events(&client, limit, since, format).await?
        }
        Commands::Scale { target, reason } => {
            scale::scale(&client, target, &reason, format).await?
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => remote_config::show_config(&client, format).await?,
            ConfigCommands::Set { assignments } => {
                remote_config::set_config(&client, &assignments, format).await?
            }
        },
        Commands::Use { .. } => {}
    }

    Ok(())
}
