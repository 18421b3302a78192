// =============================================================================
// Scripted brokerage fake for engine tests — no live brokerage REST calls.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::BrokerageError;
use crate::types::{OrderStatus, Side};

use super::order::Order;
use super::traits::Brokerage;

/// One call the engine made against the brokerage, recorded for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetSharesCount,
    GetCurrentPrice,
    GetOrderById(String),
    CancelOrder(String),
    PlaceOrder { side: Side, limit_price: Decimal, qty: Decimal },
}

/// A scripted double: shares count and current price are fixed (or mutable
/// via the setters below), orders placed through `place_order` are served
/// from a queue of canned responses queued by the test, and every call is
/// recorded so a test can assert call counts without real network I/O.
pub struct FakeBrokerage {
    shares_count: Mutex<Decimal>,
    current_price: Mutex<Decimal>,
    orders: Mutex<HashMap<String, Order>>,
    place_responses: Mutex<VecDeque<Option<Order>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBrokerage {
    pub fn new(shares_count: Decimal, current_price: Decimal) -> Self {
        Self {
            shares_count: Mutex::new(shares_count),
            current_price: Mutex::new(current_price),
            orders: Mutex::new(HashMap::new()),
            place_responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues `order` as the response to the next `place_order` call and
    /// seeds the lookup table so a later `get_order_by_id`/`cancel_order`
    /// for its id finds it.
    pub fn queue_place_order(&self, order: Order) {
        self.orders.lock().insert(order.id.clone(), order.clone());
        self.place_responses.lock().push_back(Some(order));
    }

    pub fn queue_place_order_decline(&self) {
        self.place_responses.lock().push_back(None);
    }

    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.orders.lock().get_mut(order_id) {
            order.status = status;
        }
    }

    pub fn set_current_price(&self, price: Decimal) {
        *self.current_price.lock() = price;
    }

    pub fn set_shares_count(&self, shares: Decimal) {
        *self.shares_count.lock() = shares;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }
}

#[async_trait]
impl Brokerage for FakeBrokerage {
    async fn get_shares_count(&self) -> Result<Decimal, BrokerageError> {
        self.calls.lock().push(Call::GetSharesCount);
        Ok(*self.shares_count.lock())
    }

    async fn get_current_price(&self) -> Result<Decimal, BrokerageError> {
        self.calls.lock().push(Call::GetCurrentPrice);
        Ok(*self.current_price.lock())
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Order, BrokerageError> {
        self.calls.lock().push(Call::GetOrderById(order_id.to_string()));
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerageError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerageError> {
        self.calls.lock().push(Call::CancelOrder(order_id.to_string()));
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(order_id) else {
            return Ok(false);
        };
        if order.status.is_terminal_fill() || order.status.is_terminal_cancel() {
            return Ok(false);
        }
        order.status = OrderStatus::Canceled;
        Ok(true)
    }

    async fn place_order(
        &self,
        side: Side,
        limit_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<Order>, BrokerageError> {
        self.calls.lock().push(Call::PlaceOrder { side, limit_price, qty });
        Ok(self.place_responses.lock().pop_front().flatten())
    }
}
