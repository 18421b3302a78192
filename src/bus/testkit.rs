// =============================================================================
// In-process fake bus for tests — no live redis required (§4.1)
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BusError;

use super::envelope::Envelope;
use super::schema::validate_payload;
use super::traits::Bus;

/// A `tokio::sync::broadcast`-free fake: each `subscribe` call gets its own
/// unbounded channel, and `publish` fans out synchronously to every
/// registered subscriber of that channel. Schema validation runs exactly
/// as it would against the real adapter, so a test exercising a schema
/// violation behaves identically.
#[derive(Clone)]
pub struct LocalBus {
    sender_name: String,
    handlers: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope<Value>>>>>>,
}

impl LocalBus {
    pub fn new(sender_name: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn publish<T: Serialize>(&self, channel: &str, payload: T) -> Result<(), BusError> {
        let value = serde_json::to_value(&payload)?;
        validate_payload(channel, &value)?;

        let envelope = Envelope::new(value, self.sender_name.clone());
        let handlers = self.handlers.lock();
        if let Some(senders) = handlers.get(channel) {
            for sender in senders {
                let _ = sender.send(envelope.clone());
            }
        }
        Ok(())
    }

    pub fn subscribe(&self, channel: impl Into<String>) -> mpsc::UnboundedReceiver<Envelope<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.lock().entry(channel.into()).or_default().push(tx);
        rx
    }

    pub fn unsubscribe(&self, channel: impl Into<String>) {
        self.handlers.lock().remove(&channel.into());
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish<T>(&self, channel: &str, payload: T) -> Result<(), BusError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        LocalBus::publish(self, channel, payload)
    }

    async fn subscribe(&self, channel: String) -> mpsc::UnboundedReceiver<Envelope<Value>> {
        LocalBus::subscribe(self, channel)
    }

    async fn unsubscribe(&self, channel: String) {
        LocalBus::unsubscribe(self, channel)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_channel() {
        let bus = LocalBus::new("test");
        let mut rx = bus.subscribe(crate::bus::schema::BROKER_REGISTRATION);

        bus.publish(
            crate::bus::schema::BROKER_REGISTRATION,
            json!({"action": "subscribe", "ticker": "AAPL"}),
        )
        .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.data["ticker"], "AAPL");
    }

    #[tokio::test]
    async fn publish_rejects_schema_violations() {
        let bus = LocalBus::new("test");
        let err = bus.publish(crate::bus::schema::BROKER_REGISTRATION, json!({"action": "subscribe"}));
        assert!(err.is_err());
    }
}
