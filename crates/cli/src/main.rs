//! EcoWatch CLI
//!
//! Queries the detector service: run predictions, browse sensor readings
//! and prediction history, and send or list alerts.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, inspect, predict};

/// EcoWatch CLI
#[derive(Parser)]
#[command(name = "ecowatch")]
#[command(author, version, about = "CLI for the EcoWatch mining-activity detector", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via ECOWATCH_API_URL env var)
    #[arg(long, env = "ECOWATCH_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a sensor's latest reading
    Predict {
        /// Sensor ID (e.g. SNR-001)
        sensor_id: String,

        /// Do not notify registered devices on detection
        #[arg(long)]
        no_alert: bool,
    },

    /// Classify the latest readings of several sensors
    Batch {
        /// Sensor IDs
        #[arg(required = true)]
        sensor_ids: Vec<String>,

        /// Do not notify registered devices on detection
        #[arg(long)]
        no_alert: bool,
    },

    /// Show stored predictions for a sensor, newest first
    Predictions {
        /// Sensor ID
        sensor_id: String,

        /// Maximum number of predictions (1-100)
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Show a sensor's reading history
    History {
        /// Sensor ID
        sensor_id: String,

        /// Sort order (asc or desc)
        #[arg(long, default_value = "desc")]
        order: String,

        /// Maximum number of readings
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// List sensors with their latest reading
    Sensors,

    /// Show the loaded model and its configuration
    Model,

    /// Show alert statistics across all stored predictions
    Summary,

    /// Send a manual alert for a sensor
    Alert {
        /// Sensor ID
        sensor_id: String,

        /// Send even when the sensor has no stored reading
        #[arg(long)]
        force: bool,
    },

    /// List logged alerts, newest first
    Alerts {
        /// Filter by sensor ID
        #[arg(long)]
        sensor_id: Option<String>,

        /// Maximum number of alerts (1-500)
        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },

    /// Show service health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let api_url = config.api_url(cli.api_url.as_deref());
    let format = config.format(cli.format);

    if cli.verbose {
        output::print_info(&format!("Using API at {}", api_url));
    }

    let client = client::ApiClient::new(&api_url)?;

    let result = match cli.command {
        Commands::Predict { sensor_id, no_alert } => {
            predict::predict(&client, &sensor_id, !no_alert, format).await
        }
        Commands::Batch { sensor_ids, no_alert } => {
            predict::predict_batch(&client, sensor_ids, !no_alert, format).await
        }
        Commands::Predictions { sensor_id, limit } => {
            predict::show_predictions(&client, &sensor_id, limit, format).await
        }
        Commands::History {
            sensor_id,
            order,
            limit,
        } => inspect::show_history(&client, &sensor_id, &order, limit, format).await,
        Commands::Sensors => inspect::list_sensors(&client, format).await,
        Commands::Model => inspect::show_model(&client, format).await,
        Commands::Summary => predict::show_summary(&client, format).await,
        Commands::Alert { sensor_id, force } => {
            alerts::send_alert(&client, &sensor_id, force, format).await
        }
        Commands::Alerts { sensor_id, limit } => {
            alerts::list_alerts(&client, sensor_id, limit, format).await
        }
        Commands::Health => inspect::show_health(&client, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
