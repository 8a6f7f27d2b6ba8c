//! One live client's tap into a room.

use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};

use super::events::ChatEvent;

/// Lifecycle of a subscription. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Open,
    Closed,
}

/// A subscriber's cursor into a room channel.
///
/// Dropping the subscription closes it, so every exit path of the owning
/// connection releases the cursor and its buffered backlog.
pub struct Subscription {
    id: String,
    room_id: String,
    receiver: Option<broadcast::Receiver<Arc<ChatEvent>>>,
    delivered: u64,
    skipped: u64,
}

impl Subscription {
    pub(crate) fn open(room_id: &str, receiver: broadcast::Receiver<Arc<ChatEvent>>) -> Self {
        Self {
            id: chat_common::id::prefixed_ulid(chat_common::id::prefix::SUBSCRIPTION),
            room_id: room_id.to_string(),
            receiver: Some(receiver),
            delivered: 0,
            skipped: 0,
        }
    }

    /// A subscription that is closed from the start (registry shut down).
    pub(crate) fn closed(room_id: &str) -> Self {
        Self {
            id: chat_common::id::prefixed_ulid(chat_common::id::prefix::SUBSCRIPTION),
            room_id: room_id.to_string(),
            receiver: None,
            delivered: 0,
            skipped: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn state(&self) -> SubscriptionState {
        if self.receiver.is_some() {
            SubscriptionState::Open
        } else {
            SubscriptionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SubscriptionState::Open
    }

    /// Events handed to the consumer so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Events overwritten before this subscriber read them.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Wait for the next event. Returns `None` once the subscription is
    /// closed, either by [`close`](Self::close) or by the room channel going
    /// away at shutdown.
    pub async fn recv(&mut self) -> Option<Arc<ChatEvent>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    self.delivered += 1;
                    return Some(event);
                }
                Err(RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::warn!(
                        subscription_id = %self.id,
                        room_id = %self.room_id,
                        skipped = n,
                        "subscriber lagged; oldest events dropped"
                    );
                }
                Err(RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Close the subscription. Idempotent.
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            tracing::debug!(
                subscription_id = %self.id,
                room_id = %self.room_id,
                delivered = self.delivered,
                skipped = self.skipped,
                "subscription closed"
            );
        }
    }

    /// Turn the subscription into a stream of events that ends when the
    /// subscription closes. Dropping the stream closes the subscription.
    pub fn into_stream(self) -> impl Stream<Item = Arc<ChatEvent>> + Send + 'static {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(n: usize) -> Arc<ChatEvent> {
        Arc::new(ChatEvent {
            id: n.to_string(),
            room_id: "r".to_string(),
            sender_id: 1,
            text: format!("m{n}"),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn close_releases_receiver() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::open("r", rx);
        assert_eq!(sub.room_id(), "r");
        assert!(sub.id().starts_with("sub_"));
        assert_eq!(tx.receiver_count(), 1);
        assert!(sub.is_open());

        sub.close();
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert_eq!(tx.receiver_count(), 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn drop_releases_receiver() {
        let (tx, rx) = broadcast::channel::<Arc<ChatEvent>>(8);
        let sub = Subscription::open("r", rx);
        assert_eq!(tx.receiver_count(), 1);
        drop(sub);
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest_and_continues() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = Subscription::open("r", rx);
        for n in 0..10 {
            tx.send(event(n)).unwrap();
        }

        let first = sub.recv().await.unwrap();
        assert_eq!(first.text, "m6");
        assert_eq!(sub.skipped(), 6);
        for n in 7..10 {
            assert_eq!(sub.recv().await.unwrap().text, format!("m{n}"));
        }
        assert_eq!(sub.delivered(), 4);
    }

    #[tokio::test]
    async fn sender_drop_closes_subscription() {
        let (tx, rx) = broadcast::channel::<Arc<ChatEvent>>(4);
        let mut sub = Subscription::open("r", rx);
        drop(tx);
        assert!(sub.recv().await.is_none());
        assert!(!sub.is_open());
    }
}
