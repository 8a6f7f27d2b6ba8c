use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chat_common::snowflake::snowflake_timestamp_ms;
use chat_common::SnowflakeGenerator;
use parking_lot::RwLock;

use crate::error::ApiError;
use crate::gateway::events::ChatEvent;

/// Abstraction over message persistence.
///
/// Creation assigns the event id and timestamp; the returned event is final
/// and is what gets published for live delivery.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(
        &self,
        room_id: &str,
        sender_id: i64,
        text: &str,
    ) -> Result<ChatEvent, ApiError>;
    async fn get(&self, id: &str) -> Result<Option<ChatEvent>, ApiError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (single process / tests)
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    snowflake: SnowflakeGenerator,
    messages: RwLock<HashMap<String, ChatEvent>>,
}

impl MemoryMessageStore {
    pub fn new(worker_id: u16) -> Self {
        Self {
            snowflake: SnowflakeGenerator::new(worker_id),
            messages: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(
        &self,
        room_id: &str,
        sender_id: i64,
        text: &str,
    ) -> Result<ChatEvent, ApiError> {
        let id = self.snowflake.generate();
        // The timestamp comes from the snowflake itself so `id` and
        // `createdAt` always agree.
        let created_at = DateTime::<Utc>::from_timestamp_millis(snowflake_timestamp_ms(id) as i64)
            .unwrap_or_else(Utc::now);

        let event = ChatEvent {
            id: id.to_string(),
            room_id: room_id.to_string(),
            sender_id,
            text: text.to_string(),
            created_at,
        };
        self.messages.write().insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn get(&self, id: &str) -> Result<Option<ChatEvent>, ApiError> {
        Ok(self.messages.read().get(id).cloned())
    }
}
