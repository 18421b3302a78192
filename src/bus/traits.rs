// =============================================================================
// Bus — the seam the engine depends on, so tests can drive it with
// `testkit::LocalBus` instead of a live redis connection (§4.1).
// =============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BusError;

use super::envelope::Envelope;

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish<T>(&self, channel: &str, payload: T) -> Result<(), BusError>
    where
        T: Serialize + Send + Sync + 'static;

    async fn subscribe(&self, channel: String) -> mpsc::UnboundedReceiver<Envelope<Value>>;

    async fn unsubscribe(&self, channel: String);

    async fn close(&self);
}
