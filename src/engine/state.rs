// =============================================================================
// Engine-owned state (§3, §9 — no captured closure state, just struct fields)
// =============================================================================

use rust_decimal::Decimal;

use crate::brokerage::TradeUpdate;
use crate::types::Side;

/// The one open brokerage order the engine is ever waiting on.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub id: String,
    pub side: Side,
    /// `None` for a market order placed against the fractional remainder.
    pub limit_price: Option<Decimal>,
    pub qty: Decimal,
    pub line_index: i64,
}

/// One item on the engine's single-consumer action queue.
#[derive(Debug, Clone)]
pub enum Action {
    PriceUpdate(Decimal),
    OrderUpdate(TradeUpdate),
    ManualReconcileTick,
}
