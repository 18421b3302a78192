// =============================================================================
// Environment-driven configuration and logging setup (§6, ambient stack)
// =============================================================================

use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use chrono_tz::America::New_York;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::types::TradingMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u8,
    pub data_root: PathBuf,
    pub price_stream_url: String,
    pub order_stream_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            redis_db: std::env::var("REDIS_DB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            data_root: PathBuf::from(std::env::var("DATA_ROOT").unwrap_or_else(|_| "./data".to_string())),
            price_stream_url: std::env::var("PRICE_STREAM_URL")
                .unwrap_or_else(|_| "wss://stream.data.alpaca.markets/v2/sip".to_string()),
            order_stream_url: std::env::var("ORDER_STREAM_URL")
                .unwrap_or_else(|_| "wss://paper-api.alpaca.markets/stream".to_string()),
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }

    pub fn ladder_path(&self, ticker: &str, mode: TradingMode) -> PathBuf {
        self.data_root
            .join("ticker_data")
            .join(mode.as_str())
            .join(format!("{}.csv", ticker.to_ascii_uppercase()))
    }

    pub fn profit_path(&self, date: chrono::NaiveDate) -> PathBuf {
        profit_path_under(&self.data_root, date)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }
}

/// Builds a `tracing` subscriber writing to `<DATA_ROOT>/logs/<name>_<date>.log`,
/// where `<date>` is today's date in the New York session timezone rather than
/// the host's local clock or UTC — so a log file always lines up with the
/// trading day it covers, regardless of which region the worker runs in.
///
/// The returned guard must be kept alive for the lifetime of the process;
/// dropping it flushes and stops the non-blocking writer.
pub fn init_tracing(config: &Config, name: &str) -> WorkerGuard {
    let ny_now = Utc::now().with_timezone(&New_York);
    let file_name = format!("{name}_{}.log", ny_now.format("%Y-%m-%d"));

    let appender = tracing_appender::rolling::never(config.log_dir(), file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .init();

    guard
}

/// Used by the profit aggregator's UTC-midnight rollover (§4.7).
pub fn utc_today() -> chrono::NaiveDate {
    Utc::now().date_naive()
}

pub fn profit_path_under(data_root: &std::path::Path, date: chrono::NaiveDate) -> PathBuf {
    data_root
        .join("performance")
        .join("profits")
        .join(format!("{:04}", date.format("%Y")))
        .join(format!("{:02}", date.format("%m")))
        .join(format!("{}_profit.json", date.format("%Y-%m-%d")))
}
