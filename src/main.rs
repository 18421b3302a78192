// =============================================================================
// scale-ladder — CLI entry point
// =============================================================================

mod aggregator;
mod brokerage;
mod bus;
mod config;
mod engine;
mod error;
mod gateway;
mod ladder;
mod supervisor;
mod types;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::aggregator::ProfitAggregator;
use crate::bus::MessageBus;
use crate::config::{init_tracing, Config};
use crate::types::TradingMode;

#[derive(Parser)]
#[command(name = "scale-ladder", about = "Scale-in / scale-out ladder trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ladder engine for a single ticker.
    Worker {
        ticker: String,
        #[arg(value_enum)]
        mode: TradingMode,
    },
    /// Run the shared broker gateway.
    Gateway,
    /// Run the profit aggregator.
    Aggregator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    let log_name = match &cli.command {
        Command::Worker { ticker, mode } => format!("worker-{}-{}", ticker.to_ascii_uppercase(), mode),
        Command::Gateway => "gateway".to_string(),
        Command::Aggregator => "aggregator".to_string(),
    };
    let _guard = init_tracing(&config, &log_name);

    tracing::info!("scale-ladder starting");

    let result = match cli.command {
        Command::Worker { ticker, mode } => supervisor::run_worker(&config, &ticker, mode).await,
        Command::Gateway => supervisor::run_gateway(&config).await,
        Command::Aggregator => run_aggregator(&config).await,
    };

    if let Err(err) = &result {
        tracing::error!(error = %err, "scale-ladder exiting with a fatal error");
    }
    result
}

async fn run_aggregator(config: &Config) -> anyhow::Result<()> {
    let bus = Arc::new(MessageBus::connect(&config.redis_url(), "profit-aggregator").await?);
    let aggregator = ProfitAggregator::new(bus, config);

    tokio::select! {
        result = aggregator.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, stopping profit aggregator");
        }
    }
    Ok(())
}
