// =============================================================================
// Ladder Engine — the per-ticker decision loop (§4.5)
// =============================================================================

mod state;

pub use state::{Action, PendingOrder};

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use crate::brokerage::{Brokerage, TradeUpdate};
use crate::bus::{schema, Bus, ProfitReport, RegistrationAction, RegistrationMessage, TickerUpdate};
use crate::error::EngineError;
use crate::ladder::LadderStore;
use crate::types::{OrderState, Side};

/// A cancel fires once price has moved this far past the order's reference
/// price — 0.25% against a BUY, 0.25% against a SELL (§4.5).
const CANCEL_BUY_FACTOR: Decimal = dec!(1.0025);
const CANCEL_SELL_FACTOR: Decimal = dec!(0.9975);
const MANUAL_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failed order-fetch attempts during manual reconciliation
/// before the pending order is treated as unreconcilable and the worker
/// gives up (§7).
const MAX_RECONCILE_ATTEMPTS: u32 = 5;

/// Generic over the brokerage and bus so tests can drive the decision loop
/// with `brokerage::testkit::FakeBrokerage` / `bus::testkit::LocalBus`
/// instead of live REST/redis connections.
pub struct LadderEngine<B: Brokerage, M: Bus> {
    ticker: String,
    store: LadderStore,
    brokerage: B,
    bus: Arc<M>,
    queue_tx: mpsc::UnboundedSender<Action>,
    queue_rx: mpsc::UnboundedReceiver<Action>,
    pending: Option<PendingOrder>,
    order_state: OrderState,
    previous_price: Option<Decimal>,
    last_manual_reconcile: Option<Instant>,
    reconcile_attempts: u32,
}

impl<B: Brokerage, M: Bus> LadderEngine<B, M> {
    pub fn new(ticker: impl Into<String>, store: LadderStore, brokerage: B, bus: Arc<M>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            ticker: ticker.into(),
            store,
            brokerage,
            bus,
            queue_tx,
            queue_rx,
            pending: None,
            order_state: OrderState::None,
            previous_price: None,
            last_manual_reconcile: None,
            reconcile_attempts: 0,
        }
    }

    /// Runs initialization (§4.5 steps 1-5) and then the consumer loop
    /// until the queue is closed or a fatal error is hit.
    pub async fn run(mut self) -> Result<(), EngineError> {
        self.initialize().await?;
        self.consume_loop().await
    }

    async fn initialize(&mut self) -> Result<(), EngineError> {
        if let Some((index, order_id)) = self.store.get_pending_order_info() {
            let order = self.brokerage.get_order_by_id(&order_id).await?;
            let trade_update = TradeUpdate {
                event: order.status,
                execution_id: None,
                order: order.clone(),
                price: None,
                qty: None,
                position_qty: None,
            };
            self.pending = Some(PendingOrder {
                id: order.id.clone(),
                side: order.side,
                limit_price: order.limit_price,
                qty: order.qty,
                line_index: index,
            });
            self.order_state = match order.side {
                Side::Buy => OrderState::Buying,
                Side::Sell => OrderState::Selling,
            };
            self.handle_order_update(trade_update).await?;
        }

        let current_price = self.brokerage.get_current_price().await?;
        // The receiver is still owned by `self` at this point, so the send
        // cannot fail.
        let _ = self.queue_tx.send(Action::PriceUpdate(current_price));

        let brokerage_shares = self.brokerage.get_shares_count().await?;
        let ladder_shares = self.store.get_current_held_shares();
        if brokerage_shares != ladder_shares {
            return Err(EngineError::ShareCountMismatch {
                brokerage: brokerage_shares.to_string(),
                ladder: ladder_shares.to_string(),
            });
        }

        self.bus
            .publish(
                schema::BROKER_REGISTRATION,
                RegistrationMessage {
                    action: RegistrationAction::Subscribe,
                    ticker: self.ticker.clone(),
                },
            )
            .await?;

        let mut updates = self.bus.subscribe(schema::ticker_updates_channel(&self.ticker)).await;
        let queue_tx = self.queue_tx.clone();
        tokio::spawn(async move {
            while let Some(envelope) = updates.recv().await {
                let update: TickerUpdate = match serde_json::from_value(envelope.data) {
                    Ok(update) => update,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping malformed ticker update");
                        continue;
                    }
                };
                let action = match update {
                    TickerUpdate::Price { price, .. } => Action::PriceUpdate(price),
                    TickerUpdate::Order { order_data, .. } => Action::OrderUpdate(order_data),
                };
                if queue_tx.send(action).is_err() {
                    break;
                }
            }
        });

        let watchdog_tx = self.queue_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MANUAL_RECONCILE_INTERVAL * 3);
            loop {
                interval.tick().await;
                if watchdog_tx.send(Action::ManualReconcileTick).is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn consume_loop(mut self) -> Result<(), EngineError> {
        while let Some(action) = self.queue_rx.recv().await {
            match action {
                Action::PriceUpdate(price) => self.handle_price_update(price).await?,
                Action::OrderUpdate(update) => self.handle_order_update(update).await?,
                Action::ManualReconcileTick => self.maybe_manual_reconcile().await?,
            }
        }
        Ok(())
    }

    async fn handle_price_update(&mut self, price: Decimal) -> Result<(), EngineError> {
        if self.order_state == OrderState::Cancelling {
            return Ok(());
        }
        let price = price.round_dp(2);
        if self.previous_price == Some(price) {
            return Ok(());
        }
        self.previous_price = Some(price);

        if self.check_cancel_order(price).await? {
            return Ok(());
        }
        if self.check_place_sell_order(price).await? {
            return Ok(());
        }
        if self.check_place_buy_order(price).await? {
            return Ok(());
        }
        if self.store.is_chasable(price) {
            self.store.chase_price(price)?;
        }
        Ok(())
    }

    async fn check_cancel_order(&mut self, price: Decimal) -> Result<bool, EngineError> {
        let Some(pending) = self.pending.clone() else {
            return Ok(false);
        };

        let reference = match pending.limit_price {
            Some(limit) => limit,
            None => {
                let line = self.store.get_row_by_index(pending.line_index)?;
                match pending.side {
                    Side::Buy => line.buy_price,
                    Side::Sell => line.sell_price,
                }
            }
        };

        let should_cancel = match pending.side {
            Side::Buy => price >= reference * CANCEL_BUY_FACTOR,
            Side::Sell => price <= reference * CANCEL_SELL_FACTOR,
        };
        if !should_cancel {
            return Ok(false);
        }

        self.cancel_pending(&pending).await?;
        Ok(true)
    }

    async fn cancel_pending(&mut self, pending: &PendingOrder) -> Result<(), EngineError> {
        self.order_state = OrderState::Cancelling;
        let cancelled = self.brokerage.cancel_order(&pending.id).await.unwrap_or(false);
        if !cancelled {
            tracing::warn!(order_id = %pending.id, "cancel failed, scheduling manual reconciliation");
            self.maybe_manual_reconcile().await?;
        }
        Ok(())
    }

    async fn check_place_buy_order(&mut self, price: Decimal) -> Result<bool, EngineError> {
        if let Some(pending) = self.pending.clone() {
            if pending.side == Side::Sell {
                self.cancel_pending(&pending).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        let rows = self.store.get_rows_for_buy(price);
        if rows.is_empty() {
            return Ok(false);
        }

        let mut intended: Decimal = rows.iter().map(|l| l.target_shares - l.held_shares).sum();
        if intended > dec!(1) && intended.fract() != dec!(0) {
            intended = intended.trunc();
        }
        if intended < dec!(0.01) {
            return Ok(false);
        }

        let anchor = *rows.last().unwrap();
        let anchor_index = anchor.index;
        let anchor_buy_price = anchor.buy_price;
        let limit = (price + dec!(0.01)).min(anchor_buy_price);

        match self.brokerage.place_order(Side::Buy, limit, intended).await? {
            Some(order) => {
                self.store.set_pending_order(anchor_index, order.id.clone())?;
                self.pending = Some(PendingOrder {
                    id: order.id,
                    side: Side::Buy,
                    limit_price: order.limit_price,
                    qty: intended,
                    line_index: anchor_index,
                });
                self.order_state = OrderState::Buying;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn check_place_sell_order(&mut self, price: Decimal) -> Result<bool, EngineError> {
        if let Some(pending) = self.pending.clone() {
            if pending.side == Side::Buy {
                self.cancel_pending(&pending).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        let rows = self.store.get_rows_for_sell(price);
        if rows.is_empty() {
            return Ok(false);
        }

        let intended: Decimal = rows.iter().map(|l| l.held_shares).sum();
        if intended < dec!(0.01) {
            return Ok(false);
        }

        let anchor = *rows.first().unwrap();
        let anchor_index = anchor.index;
        let anchor_sell_price = anchor.sell_price;
        let limit = (price - dec!(0.01)).max(anchor_sell_price);

        match self.brokerage.place_order(Side::Sell, limit, intended).await? {
            Some(order) => {
                self.store.set_pending_order(anchor_index, order.id.clone())?;
                self.pending = Some(PendingOrder {
                    id: order.id,
                    side: Side::Sell,
                    limit_price: order.limit_price,
                    qty: intended,
                    line_index: anchor_index,
                });
                self.order_state = OrderState::Selling;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn handle_order_update(&mut self, update: TradeUpdate) -> Result<(), EngineError> {
        let Some(pending) = self.pending.clone() else {
            tracing::warn!(order_id = %update.order.id, "order update with no pending order, ignoring");
            return Ok(());
        };
        if update.order.id != pending.id {
            tracing::warn!(order_id = %update.order.id, expected = %pending.id, "foreign order update, ignoring");
            return Ok(());
        }

        if update.event.is_terminal_fill() {
            let filled_avg_price = update.order.filled_avg_price.unwrap_or(pending.limit_price.unwrap_or_default());
            self.store
                .update_order_status(pending.line_index, update.order.filled_qty, filled_avg_price, pending.side)?;
            self.pending = None;
            self.order_state = OrderState::None;
            self.reconcile_share_count().await?;
            self.publish_profit_report().await?;
        } else if update.event.is_terminal_cancel() {
            let _ = self.store.update_order_status(
                pending.line_index,
                update.order.filled_qty,
                update.order.filled_avg_price.unwrap_or_default(),
                pending.side,
            );
            self.store.clear_pending_order(pending.line_index)?;
            self.pending = None;
            self.order_state = OrderState::None;
            self.reconcile_share_count().await?;
        } else if update.event.is_pending() {
            tracing::debug!(order_id = %pending.id, status = %update.event, "order still pending, waiting");
        } else {
            return Err(EngineError::UnknownOrderStatus(update.event.to_string()));
        }

        Ok(())
    }

    async fn reconcile_share_count(&mut self) -> Result<(), EngineError> {
        let brokerage_shares = self.brokerage.get_shares_count().await?;
        let ladder_shares = self.store.get_current_held_shares();
        if brokerage_shares != ladder_shares {
            tracing::warn!(
                %brokerage_shares,
                %ladder_shares,
                "share count mismatch detected after order reconciliation"
            );
        }
        Ok(())
    }

    async fn publish_profit_report(&mut self) -> Result<(), EngineError> {
        let realized: Decimal = self.store.lines().iter().map(|l| l.profit).sum();
        let unrealized: Decimal = self.store.lines().iter().map(|l| l.unrealized_profit).sum();
        self.bus
            .publish(
                schema::PROFIT_REPORT,
                ProfitReport {
                    symbol: self.ticker.clone(),
                    total: realized + unrealized,
                    unrealized,
                    realized,
                    converted: None,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await?;
        Ok(())
    }

    /// Rate-limited re-fetch of the pending order, folded back through the
    /// normal order-update path as a synthetic update (§4.5, §7).
    async fn maybe_manual_reconcile(&mut self) -> Result<(), EngineError> {
        if let Some(last) = self.last_manual_reconcile {
            if last.elapsed() < MANUAL_RECONCILE_INTERVAL {
                return Ok(());
            }
        }
        self.last_manual_reconcile = Some(Instant::now());

        let Some(pending) = self.pending.clone() else {
            self.reconcile_attempts = 0;
            return Ok(());
        };

        let order = match self.brokerage.get_order_by_id(&pending.id).await {
            Ok(order) => order,
            Err(err) => {
                self.reconcile_attempts += 1;
                tracing::warn!(
                    order_id = %pending.id,
                    attempt = self.reconcile_attempts,
                    error = %err,
                    "manual reconciliation fetch failed"
                );
                if self.reconcile_attempts >= MAX_RECONCILE_ATTEMPTS {
                    return Err(EngineError::UnreconcilableOrder {
                        order_id: pending.id,
                        attempts: self.reconcile_attempts,
                    });
                }
                return Ok(());
            }
        };
        self.reconcile_attempts = 0;

        let synthetic = TradeUpdate {
            event: order.status,
            execution_id: None,
            order: order.clone(),
            price: None,
            qty: None,
            position_qty: None,
        };
        self.handle_order_update(synthetic).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use crate::brokerage::testkit::{Call, FakeBrokerage};
    use crate::brokerage::Order;
    use crate::bus::testkit::LocalBus;
    use crate::ladder::LadderLine;
    use crate::types::OrderType;

    use super::*;

    fn line(index: i64, buy: Decimal, sell: Decimal, target: Decimal, held: Decimal) -> LadderLine {
        LadderLine {
            index,
            buy_price: buy,
            sell_price: sell,
            target_shares: target,
            held_shares: held,
            pending_order_id: None,
            spc: String::new(),
            unrealized_profit: dec!(0),
            last_action: 0,
            profit: dec!(0),
        }
    }

    fn store_of(rows: &[LadderLine]) -> LadderStore {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        std::mem::forget(file);

        let mut writer = csv::Writer::from_path(&path).unwrap();
        for row in rows {
            writer.serialize(row).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        LadderStore::load(path).unwrap()
    }

    fn test_engine(store: LadderStore, brokerage: FakeBrokerage) -> LadderEngine<FakeBrokerage, LocalBus> {
        LadderEngine::new("AAPL", store, brokerage, Arc::new(LocalBus::new("test")))
    }

    fn order(id: &str, side: Side, qty: Decimal, limit_price: Option<Decimal>) -> Order {
        Order {
            id: id.to_string(),
            symbol: "AAPL".to_string(),
            side,
            order_type: if limit_price.is_some() { OrderType::Limit } else { OrderType::Market },
            status: crate::types::OrderStatus::Accepted,
            limit_price,
            qty,
            filled_qty: dec!(0),
            filled_avg_price: None,
        }
    }

    fn place_order_count(brokerage: &FakeBrokerage) -> usize {
        brokerage.call_count(|c| matches!(c, Call::PlaceOrder { .. }))
    }

    fn cancel_order_count(brokerage: &FakeBrokerage, id: &str) -> usize {
        brokerage.call_count(|c| matches!(c, Call::CancelOrder(order_id) if order_id == id))
    }

    /// Seed scenario 5: a fractional target (1.5 shares) must still place a
    /// whole-share limit BUY first — `check_place_buy_order`'s truncation
    /// rule, not the fractional market-order path.
    #[tokio::test]
    async fn scenario_5_fractional_target_places_whole_share_buy_first() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1.5), dec!(0))];
        let store = store_of(&rows);

        let brokerage = FakeBrokerage::new(dec!(0), dec!(99.50));
        brokerage.queue_place_order(order("buy-1", Side::Buy, dec!(1), Some(dec!(99.50))));

        let mut engine = test_engine(store, brokerage);
        let handled = engine.check_place_buy_order(dec!(99.50)).await.unwrap();

        assert!(handled);
        assert_eq!(engine.order_state, OrderState::Buying);
        assert_eq!(engine.pending.as_ref().unwrap().qty, dec!(1));
        assert_eq!(place_order_count(&engine.brokerage), 1);
    }

    /// Seed scenario 2: once a SELL is pending, a later price tick that
    /// doesn't clear the cancel threshold must be a no-op, not a second
    /// `place_order` call on top of the one still outstanding.
    #[tokio::test]
    async fn scenario_2_pending_sell_is_not_duplicated_by_a_later_price_tick() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1), dec!(1))];
        let store = store_of(&rows);

        let brokerage = FakeBrokerage::new(dec!(1), dec!(100.00));
        brokerage.queue_place_order(order("sell-1", Side::Sell, dec!(1), Some(dec!(100.00))));

        let mut engine = test_engine(store, brokerage);

        assert!(engine.check_place_sell_order(dec!(100.00)).await.unwrap());
        assert_eq!(engine.pending.as_ref().unwrap().id, "sell-1");

        // 100.50 doesn't clear the 99.75 cancel threshold, so this must
        // neither cancel nor place a second sell.
        let handled_again = engine.check_place_sell_order(dec!(100.50)).await.unwrap();
        assert!(!handled_again);
        assert_eq!(engine.pending.as_ref().unwrap().id, "sell-1");
        assert_eq!(place_order_count(&engine.brokerage), 1);
    }

    /// The mirror image of the above: a pending SELL must not block a BUY
    /// signal outright — it is cancelled first, exactly like a pending BUY
    /// is cancelled when a SELL signal arrives.
    #[tokio::test]
    async fn check_place_buy_order_cancels_a_pending_sell_first() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1), dec!(1))];
        let store = store_of(&rows);
        let brokerage = FakeBrokerage::new(dec!(1), dec!(100.00));
        brokerage.queue_place_order(order("sell-1", Side::Sell, dec!(1), Some(dec!(100.00))));

        let mut engine = test_engine(store, brokerage);
        engine.pending = Some(PendingOrder {
            id: "sell-1".to_string(),
            side: Side::Sell,
            limit_price: Some(dec!(100.00)),
            qty: dec!(1),
            line_index: 0,
        });
        engine.order_state = OrderState::Selling;

        let handled = engine.check_place_buy_order(dec!(99.50)).await.unwrap();
        assert!(handled);
        assert_eq!(engine.order_state, OrderState::Cancelling);
        assert_eq!(cancel_order_count(&engine.brokerage, "sell-1"), 1);
        assert_eq!(place_order_count(&engine.brokerage), 0);
    }

    /// A pending BUY must be cancelled (not silently skipped) the instant a
    /// SELL becomes eligible — the bug this guard mirrors fixed.
    #[tokio::test]
    async fn check_place_sell_order_cancels_a_pending_buy_first() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1), dec!(0))];
        let store = store_of(&rows);
        let brokerage = FakeBrokerage::new(dec!(0), dec!(99.50));
        brokerage.queue_place_order(order("buy-1", Side::Buy, dec!(1), Some(dec!(99.50))));

        let mut engine = test_engine(store, brokerage);
        engine.pending = Some(PendingOrder {
            id: "buy-1".to_string(),
            side: Side::Buy,
            limit_price: Some(dec!(99.50)),
            qty: dec!(1),
            line_index: 0,
        });
        engine.order_state = OrderState::Buying;

        let handled = engine.check_place_sell_order(dec!(100.50)).await.unwrap();
        assert!(handled);
        assert_eq!(engine.order_state, OrderState::Cancelling);
        assert_eq!(cancel_order_count(&engine.brokerage, "buy-1"), 1);
        assert_eq!(place_order_count(&engine.brokerage), 0);
    }

    /// A BUY must not duplicate when it is itself already pending.
    #[tokio::test]
    async fn check_place_buy_order_skips_when_a_buy_is_already_pending() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(2), dec!(0))];
        let store = store_of(&rows);
        let brokerage = FakeBrokerage::new(dec!(0), dec!(99.50));

        let mut engine = test_engine(store, brokerage);
        engine.pending = Some(PendingOrder {
            id: "buy-1".to_string(),
            side: Side::Buy,
            limit_price: Some(dec!(99.50)),
            qty: dec!(1),
            line_index: 0,
        });
        engine.order_state = OrderState::Buying;

        let handled = engine.check_place_buy_order(dec!(99.50)).await.unwrap();
        assert!(!handled);
        assert_eq!(place_order_count(&engine.brokerage), 0);
    }

    /// An unrecognized terminal status must be treated as fatal, never
    /// silently ignored.
    #[tokio::test]
    async fn handle_order_update_rejects_an_unknown_status() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1), dec!(0))];
        let store = store_of(&rows);
        let brokerage = FakeBrokerage::new(dec!(0), dec!(99.50));

        let mut engine = test_engine(store, brokerage);
        engine.pending = Some(PendingOrder {
            id: "buy-1".to_string(),
            side: Side::Buy,
            limit_price: Some(dec!(99.50)),
            qty: dec!(1),
            line_index: 0,
        });
        engine.order_state = OrderState::Buying;

        let mut stray = order("buy-1", Side::Buy, dec!(1), Some(dec!(99.50)));
        stray.status = crate::types::OrderStatus::Unknown;
        let update = TradeUpdate {
            event: stray.status,
            execution_id: None,
            order: stray,
            price: None,
            qty: None,
            position_qty: None,
        };

        let err = engine.handle_order_update(update).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownOrderStatus(_)));
    }

    /// Manual reconciliation gives up after `MAX_RECONCILE_ATTEMPTS`
    /// consecutive failed fetches rather than retrying forever.
    #[tokio::test]
    async fn manual_reconcile_becomes_unreconcilable_after_max_attempts() {
        let rows = vec![line(0, dec!(99.50), dec!(100.00), dec!(1), dec!(0))];
        let store = store_of(&rows);
        let brokerage = FakeBrokerage::new(dec!(0), dec!(99.50));
        // No order queued under "buy-1", so every fetch attempt fails with
        // `OrderNotFound`.

        let mut engine = test_engine(store, brokerage);
        engine.pending = Some(PendingOrder {
            id: "buy-1".to_string(),
            side: Side::Buy,
            limit_price: Some(dec!(99.50)),
            qty: dec!(1),
            line_index: 0,
        });
        engine.order_state = OrderState::Buying;

        for _ in 0..MAX_RECONCILE_ATTEMPTS - 1 {
            engine.maybe_manual_reconcile().await.unwrap();
            engine.last_manual_reconcile = None;
        }
        assert_eq!(engine.reconcile_attempts, MAX_RECONCILE_ATTEMPTS - 1);

        let err = engine.maybe_manual_reconcile().await.unwrap_err();
        assert!(matches!(err, EngineError::UnreconcilableOrder { attempts, .. } if attempts == MAX_RECONCILE_ATTEMPTS));
    }
}
