//! Room registry: the in-process fan-out point for live chat events.
//!
//! Each room owns one `tokio::sync::broadcast` channel. Every subscriber holds
//! its own cursor into the channel's ring, so a slow subscriber only ever
//! loses its own oldest events and never holds up the emitter or its peers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use super::events::ChatEvent;
use super::session::Subscription;

struct RoomChannel {
    sender: broadcast::Sender<Arc<ChatEvent>>,
    /// Set by the sweeper when it first sees the room with no subscribers.
    idle_since: Option<Instant>,
}

impl RoomChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            idle_since: None,
        }
    }
}

/// Shared registry of room channels.
///
/// Constructed once per service (and once per test), closed at shutdown.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomChannel>,
    capacity: usize,
    closed: AtomicBool,
}

impl RoomRegistry {
    /// `capacity` is the per-room ring size: how far a subscriber may fall
    /// behind before its oldest undelivered events are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Offer `event` to every subscriber currently open on `room_id`,
    /// creating the room if needed. Never waits on subscribers.
    ///
    /// Returns the number of subscribers the event was offered to.
    pub fn emit(&self, room_id: &str, event: Arc<ChatEvent>) -> usize {
        if self.is_closed() {
            return 0;
        }

        let reached = match self.rooms.get(room_id) {
            Some(room) => room.sender.send(event).unwrap_or(0),
            None => self
                .rooms
                .entry(room_id.to_string())
                .or_insert_with(|| RoomChannel::new(self.capacity))
                .sender
                .send(event)
                .unwrap_or(0),
        };

        tracing::trace!(%room_id, reached, "event emitted");
        reached
    }

    /// Open a subscription that sees every event emitted to `room_id` after
    /// this call returns.
    pub fn subscribe(&self, room_id: &str) -> Subscription {
        if self.is_closed() {
            return Subscription::closed(room_id);
        }

        let receiver = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomChannel::new(self.capacity))
            .sender
            .subscribe();

        // `close` may have cleared the map between the check above and the
        // insert; a room created after that would never end.
        if self.is_closed() {
            drop(receiver);
            self.rooms.remove(room_id);
            return Subscription::closed(room_id);
        }

        let subscription = Subscription::open(room_id, receiver);
        tracing::debug!(
            %room_id,
            subscription_id = %subscription.id(),
            "subscription opened"
        );
        subscription
    }

    /// Number of room channels currently held.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Open subscriptions on one room.
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Open subscriptions across all rooms.
    pub fn total_subscribers(&self) -> usize {
        self.rooms
            .iter()
            .map(|room| room.sender.receiver_count())
            .sum()
    }

    /// Drop rooms that have had no subscribers for at least `idle_ttl`.
    ///
    /// Idleness is observed by the sweep itself: a room found empty is marked,
    /// and removed on a later sweep if it is still empty and the mark is old
    /// enough. Returns the number of rooms removed.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.rooms.len();
        // `retain` holds the shard lock, so a concurrent `subscribe` either
        // lands before the check (room kept) or after removal (room recreated).
        self.rooms.retain(|_, room| {
            if room.sender.receiver_count() > 0 {
                room.idle_since = None;
                return true;
            }
            match room.idle_since {
                Some(since) => now.duration_since(since) < idle_ttl,
                None => {
                    room.idle_since = Some(now);
                    true
                }
            }
        });
        before.saturating_sub(self.rooms.len())
    }

    /// Shut the registry down. Every open subscription observes end-of-stream;
    /// later emits are dropped and later subscriptions start closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rooms = self.rooms.len();
        self.rooms.clear();
        tracing::info!(rooms, "room registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Periodically evict idle rooms until the registry is closed.
pub fn spawn_idle_sweeper(
    registry: Arc<RoomRegistry>,
    interval: Duration,
    idle_ttl: Duration,
) -> JoinHandle<()> {
    tracing::info!(
        interval_secs = interval.as_secs(),
        idle_ttl_secs = idle_ttl.as_secs(),
        "starting idle room sweeper"
    );

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if registry.is_closed() {
                break;
            }
            let evicted = registry.evict_idle(idle_ttl);
            if evicted > 0 {
                tracing::debug!(evicted, remaining = registry.room_count(), "idle rooms evicted");
            }
        }
    })
}
