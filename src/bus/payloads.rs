// =============================================================================
// Typed payload shapes carried over the bus channels (§6)
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::brokerage::TradeUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMessage {
    pub action: RegistrationAction,
    pub ticker: String,
}

/// Engines never compare a mixed enum-and-string tag; the wire shape is
/// one tagged union decoded straight off `TICKER_UPDATES_<SYMBOL>` (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TickerUpdate {
    Price {
        timestamp: chrono::DateTime<chrono::Utc>,
        price: Decimal,
        volume: Option<Decimal>,
        symbol: String,
    },
    Order {
        timestamp: chrono::DateTime<chrono::Utc>,
        symbol: String,
        order_data: TradeUpdate,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitReport {
    pub symbol: String,
    pub total: Decimal,
    pub unrealized: Decimal,
    pub realized: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted: Option<Decimal>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
