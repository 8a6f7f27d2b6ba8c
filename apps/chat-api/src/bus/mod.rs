//! Shared publish/subscribe transport between chat-api processes.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

/// Buffer between a bus backend and the task consuming its subscription.
pub const SUBSCRIPTION_BUFFER: usize = 4096;

/// One payload received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Concrete topic the payload was published on.
    pub topic: String,
    pub payload: String,
}

/// Receiving end of a pattern subscription. Dropping it unsubscribes.
pub type BusSubscription = mpsc::Receiver<BusMessage>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("bus is closed")]
    Closed,
}

/// Abstraction over the publish/subscribe bus.
///
/// Backed by Redis in production and an in-process fan-out in tests.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    /// Subscribe to every topic matching a glob `pattern` (`*` matches any
    /// run of characters). The subscription is live when this returns.
    async fn psubscribe(&self, pattern: &str) -> Result<BusSubscription, BusError>;
}

/// Glob match supporting `*` wildcards, the subset of Redis pattern syntax
/// the bridge relies on.
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = topic.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard: exact match.
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_room_topics() {
        assert!(pattern_matches("chat:*", "chat:general"));
        assert!(pattern_matches("chat:*", "chat:"));
        assert!(pattern_matches("chat:*", "chat:a:b"));
        assert!(!pattern_matches("chat:*", "presence:general"));
        assert!(!pattern_matches("chat:*", "cha"));
    }

    #[test]
    fn exact_and_inner_wildcards() {
        assert!(pattern_matches("chat:general", "chat:general"));
        assert!(!pattern_matches("chat:general", "chat:general2"));
        assert!(pattern_matches("a*c*e", "abcde"));
        assert!(!pattern_matches("a*c*e", "abde"));
        assert!(pattern_matches("*", "anything"));
    }
}
