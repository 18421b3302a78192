// =============================================================================
// Envelope — the uniform outer shape of every bus message (§3, §6)
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wraps every payload published on the bus in `{data, timestamp, sender}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
}

impl<T> Envelope<T> {
    pub fn new(data: T, sender: impl Into<String>) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
            sender: sender.into(),
        }
    }
}
