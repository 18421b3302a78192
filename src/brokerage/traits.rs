// =============================================================================
// Brokerage — the seam the engine depends on, so tests can drive it with a
// scripted fake instead of live brokerage REST calls.
// =============================================================================

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::BrokerageError;
use crate::types::Side;

use super::order::Order;

#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn get_shares_count(&self) -> Result<Decimal, BrokerageError>;

    async fn get_current_price(&self) -> Result<Decimal, BrokerageError>;

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerageError>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerageError>;

    async fn place_order(
        &self,
        side: Side,
        limit_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<Order>, BrokerageError>;
}
