// =============================================================================
// Narrow data-transfer types read off brokerage order objects (§9 design note)
// =============================================================================
//
// The brokerage SDK's own order model carries dozens of fields behind
// dynamic attribute access; the engine only ever reads these. Conversion
// from the brokerage's wire shape happens once, at the gateway boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderStatus, OrderType, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub limit_price: Option<Decimal>,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
}

/// A streamed order-event update from the gateway, already flattened and
/// stringified at the gateway boundary (§4.4) so no precision is lost in
/// transit over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub event: OrderStatus,
    pub execution_id: Option<String>,
    pub order: Order,
    pub price: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub position_qty: Option<Decimal>,
}
