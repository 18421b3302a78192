// =============================================================================
// MessageBus — the real, redis-backed pub/sub adapter (§4.1)
// =============================================================================
//
// One connection is used for publishing; a second, dedicated connection is
// owned exclusively by a background task that services subscribe/unsubscribe
// requests and fans incoming messages out to per-channel receivers. This is
// the multi-process analog of the teacher's single-connection market-data
// reconnect loop: one task owns the socket, everyone else talks to it
// through a channel.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::BusError;

use super::envelope::Envelope;
use super::schema::validate_payload;
use super::traits::Bus;

enum Control {
    Subscribe {
        channel: String,
        tx: mpsc::UnboundedSender<Envelope<Value>>,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: String,
        ack: oneshot::Sender<()>,
    },
    Stop,
}

pub struct MessageBus {
    publish_conn: tokio::sync::Mutex<redis::aio::MultiplexedConnection>,
    control_tx: mpsc::UnboundedSender<Control>,
    listen_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    sender_name: String,
}

impl MessageBus {
    pub async fn connect(redis_url: &str, sender_name: impl Into<String>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url)?;
        let publish_conn = client.get_multiplexed_async_connection().await?;
        let pubsub_conn = client.get_async_connection().await?.into_pubsub();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let listen_task = tokio::spawn(run_listener(pubsub_conn, control_rx));

        Ok(Self {
            publish_conn: tokio::sync::Mutex::new(publish_conn),
            control_tx,
            listen_task: tokio::sync::Mutex::new(Some(listen_task)),
            sender_name: sender_name.into(),
        })
    }

    /// Validates `payload` against `channel`'s schema, wraps it in an
    /// envelope, and publishes it. Validation failures never reach the
    /// wire — they are returned to the caller (§4.1).
    pub async fn publish<T: Serialize>(&self, channel: &str, payload: T) -> Result<(), BusError> {
        let value = serde_json::to_value(&payload)?;
        validate_payload(channel, &value)?;

        let envelope = Envelope::new(value, self.sender_name.clone());
        let body = serde_json::to_string(&envelope)?;

        let mut conn = self.publish_conn.lock().await;
        conn.publish::<_, _, ()>(channel, body).await?;
        Ok(())
    }

    /// Subscribes to `channel`, returning a receiver of decoded envelopes.
    /// Messages that fail to parse are logged and dropped by the listener
    /// task; they never reach this receiver (§4.1).
    pub async fn subscribe(&self, channel: impl Into<String>) -> mpsc::UnboundedReceiver<Envelope<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self.control_tx.send(Control::Subscribe {
            channel: channel.into(),
            tx,
            ack: ack_tx,
        });
        let _ = ack_rx.await;
        rx
    }

    pub async fn unsubscribe(&self, channel: impl Into<String>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self.control_tx.send(Control::Unsubscribe {
            channel: channel.into(),
            ack: ack_tx,
        });
        let _ = ack_rx.await;
    }

    /// Closes the subscriber first, then the publisher — mirroring the
    /// gateway's own ordered shutdown (§4.4).
    pub async fn close(&self) {
        let _ = self.control_tx.send(Control::Stop);
        let handle = self.listen_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "bus listener task did not shut down cleanly");
            }
        }
    }
}

#[async_trait]
impl Bus for MessageBus {
    async fn publish<T>(&self, channel: &str, payload: T) -> Result<(), BusError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        MessageBus::publish(self, channel, payload).await
    }

    async fn subscribe(&self, channel: String) -> mpsc::UnboundedReceiver<Envelope<Value>> {
        MessageBus::subscribe(self, channel).await
    }

    async fn unsubscribe(&self, channel: String) {
        MessageBus::unsubscribe(self, channel).await
    }

    async fn close(&self) {
        MessageBus::close(self).await
    }
}

async fn run_listener(
    mut pubsub: redis::aio::PubSub,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let mut handlers: HashMap<String, Vec<mpsc::UnboundedSender<Envelope<Value>>>> = HashMap::new();

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                match control {
                    Some(Control::Subscribe { channel, tx, ack }) => {
                        if let Err(err) = pubsub.subscribe(&channel).await {
                            tracing::warn!(%channel, error = %err, "failed to subscribe to channel");
                        }
                        handlers.entry(channel).or_default().push(tx);
                        let _ = ack.send(());
                    }
                    Some(Control::Unsubscribe { channel, ack }) => {
                        handlers.remove(&channel);
                        if let Err(err) = pubsub.unsubscribe(&channel).await {
                            tracing::warn!(%channel, error = %err, "failed to unsubscribe from channel");
                        }
                        let _ = ack.send(());
                    }
                    Some(Control::Stop) | None => {
                        break;
                    }
                }
            }
            msg = pubsub.on_message().next() => {
                let Some(msg) = msg else { break };
                let channel: String = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(%channel, error = %err, "failed to read bus message payload");
                        continue;
                    }
                };
                let envelope: Envelope<Value> = match serde_json::from_str(&payload) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::warn!(%channel, error = %err, "failed to parse bus envelope, dropping");
                        continue;
                    }
                };
                if let Some(senders) = handlers.get(&channel) {
                    for sender in senders {
                        let _ = sender.send(envelope.clone());
                    }
                }
            }
        }
    }
}
