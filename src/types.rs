// =============================================================================
// Shared types used across the ladder trading engine
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which brokerage account the ladder is trading against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(format!("invalid trading mode '{other}', expected 'paper' or 'live'")),
        }
    }
}

/// Order side, mirrored from the brokerage's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Limit vs market order. Market orders are used only for the fractional-
/// share remainder a limit order cannot represent (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Brokerage order lifecycle status. The ladder engine treats everything
/// outside this set as a fatal, unrecoverable condition (§4.5) — `Unknown`
/// catches any status string the brokerage sends that isn't one of these
/// (e.g. `rejected`, `replaced`, `pending_replace`) so that condition is a
/// typed variant rather than a deserialize failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    New,
    PendingNew,
    PartiallyFilled,
    PendingCancel,
    Filled,
    Canceled,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal_fill(self) -> bool {
        matches!(self, Self::Filled)
    }

    pub fn is_terminal_cancel(self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }

    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Accepted
                | Self::New
                | Self::PartiallyFilled
                | Self::PendingNew
                | Self::PendingCancel
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::New => "new",
            Self::PendingNew => "pending_new",
            Self::PartiallyFilled => "partially_filled",
            Self::PendingCancel => "pending_cancel",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The one open-order state the decision loop ever tracks (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderState {
    #[default]
    None,
    Buying,
    Selling,
    Cancelling,
}
