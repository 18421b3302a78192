// =============================================================================
// Broker Gateway — owns the single streaming connection (§4.4)
// =============================================================================
//
// Three tasks run under one gateway: a price-stream reader, an order-stream
// reader, and a registration-channel subscriber. Each follows the teacher's
// connect/read-until-error/report-for-retry shape; subscription changes are
// applied by tearing down and reconnecting the price stream, the same
// restart-the-producer approach the original broker used when its
// subscribed-symbol set changed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::bus::{schema, MessageBus, RegistrationAction, RegistrationMessage, TickerUpdate};
use crate::brokerage::{Order, TradeUpdate};
use crate::types::{OrderStatus, OrderType, Side};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct BrokerGateway {
    bus: Arc<MessageBus>,
    price_stream_url: String,
    order_stream_url: String,
    key_id: String,
    secret_key: String,
    subscribed_symbols: Arc<RwLock<HashSet<String>>>,
    resubscribe: Arc<Notify>,
    running: Arc<AtomicBool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerGateway {
    pub fn new(
        bus: Arc<MessageBus>,
        price_stream_url: impl Into<String>,
        order_stream_url: impl Into<String>,
        key_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            price_stream_url: price_stream_url.into(),
            order_stream_url: order_stream_url.into(),
            key_id: key_id.into(),
            secret_key: secret_key.into(),
            subscribed_symbols: Arc::new(RwLock::new(HashSet::new())),
            resubscribe: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("broker gateway already running, ignoring start");
            return;
        }

        let price_task = tokio::spawn(run_price_stream(
            self.bus.clone(),
            self.price_stream_url.clone(),
            self.key_id.clone(),
            self.secret_key.clone(),
            self.subscribed_symbols.clone(),
            self.resubscribe.clone(),
            self.running.clone(),
        ));
        let order_task = tokio::spawn(run_order_stream(
            self.bus.clone(),
            self.order_stream_url.clone(),
            self.key_id.clone(),
            self.secret_key.clone(),
            self.running.clone(),
        ));
        let registration_task = tokio::spawn(run_registration_subscriber(
            self.bus.clone(),
            self.subscribed_symbols.clone(),
            self.resubscribe.clone(),
        ));

        *self.tasks.lock() = vec![price_task, order_task, registration_task];
        tracing::info!("broker gateway started");
    }

    /// Closes the bus subscriber, then the brokerage streams, then the bus
    /// publisher, in that order, before joining every worker task with a
    /// bounded timeout (§4.4).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.bus.unsubscribe(schema::BROKER_REGISTRATION).await;
        self.resubscribe.notify_waiters();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "gateway task panicked"),
                Err(_) => tracing::warn!("gateway task did not exit within the shutdown timeout"),
            }
        }

        self.bus.close().await;
        tracing::info!("broker gateway stopped");
    }

    pub fn subscribed_symbols(&self) -> HashSet<String> {
        self.subscribed_symbols.read().clone()
    }
}

async fn run_registration_subscriber(
    bus: Arc<MessageBus>,
    subscribed_symbols: Arc<RwLock<HashSet<String>>>,
    resubscribe: Arc<Notify>,
) {
    let mut rx = bus.subscribe(schema::BROKER_REGISTRATION).await;
    while let Some(envelope) = rx.recv().await {
        let message: RegistrationMessage = match serde_json::from_value(envelope.data) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed registration message");
                continue;
            }
        };

        let ticker = message.ticker.to_ascii_uppercase();
        let mut changed = false;
        match message.action {
            RegistrationAction::Subscribe => {
                changed = subscribed_symbols.write().insert(ticker.clone());
                tracing::info!(%ticker, "ticker registered for price streaming");
            }
            RegistrationAction::Unsubscribe => {
                changed = subscribed_symbols.write().remove(&ticker);
                tracing::info!(%ticker, "ticker deregistered from price streaming");
            }
        }
        if changed {
            resubscribe.notify_waiters();
        }
    }
}

async fn run_price_stream(
    bus: Arc<MessageBus>,
    url: String,
    key_id: String,
    secret_key: String,
    subscribed_symbols: Arc<RwLock<HashSet<String>>>,
    resubscribe: Arc<Notify>,
    running: Arc<AtomicBool>,
) {
    #[derive(Deserialize)]
    struct RawTrade {
        #[serde(rename = "S")]
        symbol: String,
        #[serde(rename = "p")]
        price: Decimal,
        #[serde(rename = "s")]
        volume: Option<Decimal>,
        #[serde(rename = "t")]
        timestamp: chrono::DateTime<chrono::Utc>,
    }

    while running.load(Ordering::SeqCst) {
        if subscribed_symbols.read().is_empty() {
            tracing::debug!("no symbols subscribed, price stream idle");
            tokio::select! {
                _ = resubscribe.notified() => continue,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue,
            }
        }

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "price stream connect failed, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let auth = serde_json::json!({"action": "auth", "key": key_id, "secret": secret_key});
        if write.send(Message::Text(auth.to_string())).await.is_err() {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }

        let symbols: Vec<String> = subscribed_symbols.read().iter().cloned().collect();
        let subscribe = serde_json::json!({"action": "subscribe", "trades": symbols});
        if write.send(Message::Text(subscribe.to_string())).await.is_err() {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }

        loop {
            tokio::select! {
                _ = resubscribe.notified() => {
                    tracing::info!("subscribed symbols changed, reconnecting price stream");
                    break;
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        tracing::warn!("price stream closed by server, reconnecting");
                        break;
                    };
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(err) => {
                            tracing::warn!(error = %err, "price stream read error, reconnecting");
                            break;
                        }
                    };
                    let Message::Text(text) = msg else { continue };
                    let trade: RawTrade = match serde_json::from_str(&text) {
                        Ok(trade) => trade,
                        Err(err) => {
                            tracing::debug!(error = %err, "ignoring non-trade price stream message");
                            continue;
                        }
                    };

                    let payload = TickerUpdate::Price {
                        timestamp: trade.timestamp,
                        price: trade.price,
                        volume: trade.volume,
                        symbol: trade.symbol.clone(),
                    };
                    if let Err(err) = bus.publish(&schema::ticker_updates_channel(&trade.symbol), payload).await {
                        tracing::warn!(error = %err, "failed to publish price update");
                    }
                }
            }
            if !running.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

async fn run_order_stream(
    bus: Arc<MessageBus>,
    url: String,
    key_id: String,
    secret_key: String,
    running: Arc<AtomicBool>,
) {
    #[derive(Deserialize)]
    struct RawOrder {
        id: String,
        symbol: String,
        side: Side,
        order_type: OrderType,
        status: OrderStatus,
        limit_price: Option<Decimal>,
        qty: Decimal,
        filled_qty: Decimal,
        filled_avg_price: Option<Decimal>,
    }

    #[derive(Deserialize)]
    struct RawOrderEvent {
        event: OrderStatus,
        execution_id: Option<String>,
        order: RawOrder,
        price: Option<Decimal>,
        qty: Option<Decimal>,
        position_qty: Option<Decimal>,
        timestamp: chrono::DateTime<chrono::Utc>,
    }

    while running.load(Ordering::SeqCst) {
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "order stream connect failed, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let auth = serde_json::json!({"action": "auth", "key": key_id, "secret": secret_key});
        if write.send(Message::Text(auth.to_string())).await.is_err() {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }
        let listen = serde_json::json!({"action": "listen", "data": {"streams": ["trade_updates"]}});
        if write.send(Message::Text(listen.to_string())).await.is_err() {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        }

        loop {
            let Some(msg) = read.next().await else {
                tracing::warn!("order stream closed by server, reconnecting");
                break;
            };
            let msg = match msg {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(error = %err, "order stream read error, reconnecting");
                    break;
                }
            };
            let Message::Text(text) = msg else { continue };
            let event: RawOrderEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring non-order-event stream message");
                    continue;
                }
            };

            let symbol = event.order.symbol.clone();
            let trade_update = TradeUpdate {
                event: event.event,
                execution_id: event.execution_id,
                order: Order {
                    id: event.order.id,
                    symbol: event.order.symbol,
                    side: event.order.side,
                    order_type: event.order.order_type,
                    status: event.order.status,
                    limit_price: event.order.limit_price,
                    qty: event.order.qty,
                    filled_qty: event.order.filled_qty,
                    filled_avg_price: event.order.filled_avg_price,
                },
                price: event.price,
                qty: event.qty,
                position_qty: event.position_qty,
            };

            let payload = TickerUpdate::Order {
                timestamp: event.timestamp,
                symbol: symbol.clone(),
                order_data: trade_update,
            };
            if let Err(err) = bus.publish(&schema::ticker_updates_channel(&symbol), payload).await {
                tracing::warn!(error = %err, "failed to publish order update");
            }

            if !running.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}
