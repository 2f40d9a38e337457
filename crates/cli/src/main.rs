//! Waitline CLI
//!
//! A command-line tool for querying wait-time estimates and managing the
//! per-department models of a waitline server.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, models, predict};

/// Waitline CLI
#[derive(Parser)]
#[command(name = "wl")]
#[command(author, version, about = "CLI for the Waitline wait-time service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via WAITLINE_API_URL env var)
    #[arg(long, env = "WAITLINE_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate the wait for a new token in a department
    Predict {
        /// Department ID
        department_id: i64,
    },

    /// Retrain the model for a department
    Retrain {
        /// Department ID
        department_id: i64,
    },

    /// Manage stored department models
    #[command(subcommand)]
    Models(ModelsCommands),

    /// Show service health
    Health,
}

#[derive(Subcommand)]
pub enum ModelsCommands {
    /// List stored models
    List,

    /// Drop a stored model; the next prediction retrains it
    Invalidate {
        /// Department ID
        department_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let format = config.format(cli.format)?;

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Predict { department_id } => {
            predict::predict(&client, department_id, format).await?;
        }
        Commands::Retrain { department_id } => {
            predict::retrain(&client, department_id, format).await?;
        }
        Commands::Models(models_cmd) => match models_cmd {
            ModelsCommands::List => {
                models::list_models(&client, format).await?;
            }
            ModelsCommands::Invalidate { department_id } => {
                models::invalidate_model(&client, department_id, format).await?;
            }
        },
        Commands::Health => {
            health::show_health(&client, format).await?;
        }
    }

    Ok(())
}
