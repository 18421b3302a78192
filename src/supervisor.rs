// =============================================================================
// Worker Supervisor — per-ticker process bootstrap (§4.6)
// =============================================================================

use std::sync::Arc;

use anyhow::Context;

use crate::brokerage::BrokerageClient;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::engine::LadderEngine;
use crate::gateway::BrokerGateway;
use crate::ladder::LadderStore;
use crate::types::TradingMode;

/// Builds the store, brokerage client, and engine for one ticker, then runs
/// the engine to completion. A fatal error propagates out of here and, in
/// turn, out of `main`, so the process orchestrator restarts the worker
/// (§4.6, §7).
pub async fn run_worker(config: &Config, ticker: &str, mode: TradingMode) -> anyhow::Result<()> {
    let ticker = ticker.to_ascii_uppercase();
    tracing::info!(%ticker, %mode, "starting ladder worker");

    let ladder_path = config.ladder_path(&ticker, mode);
    let store = LadderStore::load(&ladder_path)
        .with_context(|| format!("failed to load ladder file at {}", ladder_path.display()))?;

    let brokerage = BrokerageClient::new(mode, ticker.clone()).context("failed to build brokerage client")?;

    let bus = Arc::new(
        MessageBus::connect(&config.redis_url(), format!("ladder-engine-{ticker}"))
            .await
            .context("failed to connect to message bus")?,
    );

    let engine = LadderEngine::new(ticker.clone(), store, brokerage, bus);
    engine.run().await.with_context(|| format!("ladder engine for {ticker} exited fatally"))
}

/// Starts the shared broker gateway. Unlike a per-ticker worker, the
/// gateway runs until shutdown is requested rather than to completion.
pub async fn run_gateway(config: &Config) -> anyhow::Result<()> {
    tracing::info!("starting broker gateway");

    let key_id = std::env::var("PAPER_ALPACA_KEY_ID").unwrap_or_default();
    let secret_key = std::env::var("PAPER_ALPACA_SECRET_KEY").unwrap_or_default();

    let bus = Arc::new(
        MessageBus::connect(&config.redis_url(), "broker-gateway")
            .await
            .context("failed to connect to message bus")?,
    );

    let gateway = BrokerGateway::new(
        bus,
        config.price_stream_url.clone(),
        config.order_stream_url.clone(),
        key_id,
        secret_key,
    );
    gateway.start();

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, stopping broker gateway");
    gateway.stop().await;

    Ok(())
}
