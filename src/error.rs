// =============================================================================
// Error taxonomy for the ladder trading engine
// =============================================================================
//
// Each subsystem gets its own thiserror enum so callers can match on the
// failure mode that matters to them (e.g. the engine treats a brokerage
// error very differently from a ladder-store validation error). `anyhow`
// is reserved for the process-entry layer where errors are only ever
// logged and propagated, never matched on.
// =============================================================================

use thiserror::Error;

/// Failures from the [`crate::ladder::LadderStore`].
#[derive(Debug, Error)]
pub enum LadderStoreError {
    #[error("ladder file not found at {path}")]
    FileNotFound { path: String },

    #[error("failed to parse ladder file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("ladder file at {path} is missing required column '{column}'")]
    MissingColumn { path: String, column: &'static str },

    #[error("row {index} has a non-numeric value in column '{column}': '{value}'")]
    InvalidNumber {
        index: i64,
        column: &'static str,
        value: String,
    },

    #[error("no ladder line at index {0}")]
    RowNotFound(i64),

    #[error("failed to write ladder file at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures surfaced by the [`crate::brokerage::BrokerageClient`].
///
/// Network and auth failures are intentionally modeled as data (`Err`
/// returned from a fallible call) rather than panics — the engine treats
/// every brokerage failure as transient (see `EngineError` and §7 of the
/// design) and must keep running.
#[derive(Debug, Error)]
pub enum BrokerageError {
    #[error("brokerage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("brokerage returned an error response: {status} {body}")]
    ErrorResponse { status: u16, body: String },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("missing credentials for {0} trading")]
    MissingCredentials(&'static str),
}

/// Failures from the [`crate::bus`] adapter.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("payload for channel '{channel}' failed schema validation: {reason}")]
    SchemaViolation { channel: String, reason: String },

    #[error("bus connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fatal conditions that terminate a worker process outright.
///
/// These are never retried locally; recovery is a full process restart by
/// the orchestrator, reconstructing state from the ladder file and the
/// brokerage's own records (§7 of the design).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("share count mismatch at startup: brokerage reports {brokerage}, ladder reports {ladder}")]
    ShareCountMismatch { brokerage: String, ladder: String },

    #[error("unexpected terminal order status: {0}")]
    UnknownOrderStatus(String),

    #[error("pending order {order_id} could not be reconciled after {attempts} attempts")]
    UnreconcilableOrder { order_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] LadderStoreError),

    #[error(transparent)]
    Brokerage(#[from] BrokerageError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
