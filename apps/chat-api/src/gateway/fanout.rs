//! Bridge between the shared bus and the local room registry.
//!
//! Every event goes out on the bus, including events whose only subscribers
//! live in this process. The listener's single `chat:*` subscription brings
//! them back in and hands them to the registry, so local and remote delivery
//! share one path and one per-room order.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::bus::{BusError, BusMessage, BusSubscription, MessageBus};

use super::events::{room_topic, ChatEvent, TOPIC_PATTERN};
use super::registry::RoomRegistry;

/// Upper bound on one bus publish. A bus that accepts the connection but
/// never answers must not hold up the producer.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Publishes events to the bus and feeds bus traffic into the registry.
pub struct BusBridge {
    bus: Arc<dyn MessageBus>,
    registry: Arc<RoomRegistry>,
    publish_timeout: Duration,
}

impl BusBridge {
    pub fn new(bus: Arc<dyn MessageBus>, registry: Arc<RoomRegistry>) -> Self {
        Self {
            bus,
            registry,
            publish_timeout: PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Publish `event` on its room topic.
    ///
    /// Never fails from the caller's point of view: encoding or transport
    /// errors, and publishes that outlast the publish timeout, are logged and
    /// the event simply is not delivered live.
    pub async fn publish(&self, event: &ChatEvent) {
        let topic = room_topic(&event.room_id);
        let payload = match event.encode() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    %topic,
                    event_id = %event.id,
                    error = %e,
                    "failed to encode chat event"
                );
                return;
            }
        };

        match time::timeout(self.publish_timeout, self.bus.publish(&topic, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    %topic,
                    event_id = %event.id,
                    error = %e,
                    "failed to publish chat event; live delivery lost"
                );
            }
            Err(_) => {
                tracing::error!(
                    %topic,
                    event_id = %event.id,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "chat event publish timed out; live delivery lost"
                );
            }
        }
    }

    /// Subscribe to all room topics and spawn the forwarding loop.
    ///
    /// Called once at startup. The subscription is live when this returns, so
    /// anything published afterwards reaches local subscribers.
    pub async fn start(&self) -> Result<ListenerHandle, BusError> {
        let subscription = self.bus.psubscribe(TOPIC_PATTERN).await?;
        tracing::info!(pattern = TOPIC_PATTERN, "bus listener subscribed");
        let task = tokio::spawn(forward(subscription, self.registry.clone()));
        Ok(ListenerHandle { task })
    }
}

/// Handle to the running bus listener.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop forwarding. Drops the bus subscription.
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The listener loop: decode each bus payload and emit it locally. Bad
/// payloads are dropped without disturbing the loop.
async fn forward(mut subscription: BusSubscription, registry: Arc<RoomRegistry>) {
    while let Some(message) = subscription.recv().await {
        deliver(&registry, message);
    }
    tracing::warn!("bus subscription ended; live delivery stopped");
}

fn deliver(registry: &RoomRegistry, message: BusMessage) {
    match ChatEvent::decode(&message.topic, &message.payload) {
        Ok(event) => {
            let room_id = event.room_id.clone();
            registry.emit(&room_id, Arc::new(event));
        }
        Err(e) => {
            tracing::warn!(
                topic = %message.topic,
                payload_len = message.payload.len(),
                error = %e,
                "dropping malformed bus payload"
            );
        }
    }
}
