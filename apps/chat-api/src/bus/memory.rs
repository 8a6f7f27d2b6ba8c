use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{
    pattern_matches, BusError, BusMessage, BusSubscription, MessageBus, SUBSCRIPTION_BUFFER,
};

struct PatternSubscriber {
    pattern: String,
    sender: mpsc::Sender<BusMessage>,
}

/// In-process bus.
///
/// Several `AppState`s sharing one `MemoryBus` behave like several processes
/// sharing one Redis, which is how tests exercise cross-process delivery.
/// Delivery is at-most-once: a subscriber whose buffer is full misses the
/// payload rather than stalling the publisher.
pub struct MemoryBus {
    subscribers: Mutex<Vec<PatternSubscriber>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if !pattern_matches(&sub.pattern, topic) {
                return !sub.sender.is_closed();
            }
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.to_string(),
            };
            match sub.sender.try_send(message) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        %topic,
                        pattern = %sub.pattern,
                        "bus subscriber full; payload dropped"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers.lock().push(PatternSubscriber {
            pattern: pattern.to_string(),
            sender,
        });
        Ok(receiver)
    }
}
