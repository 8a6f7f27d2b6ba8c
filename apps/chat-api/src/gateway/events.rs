//! Chat event type, wire format, and bus topic naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Prefix shared by every room topic on the bus.
pub const TOPIC_PREFIX: &str = "chat:";

/// Pattern the bridge subscribes to once; matches every room topic.
pub const TOPIC_PATTERN: &str = "chat:*";

/// Upper bound on room id length, in characters.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Bus topic for a room.
pub fn room_topic(room_id: &str) -> String {
    format!("{TOPIC_PREFIX}{room_id}")
}

/// Room id carried by a topic, if it is a room topic.
pub fn topic_room(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX)
}

/// Check a client-supplied room id. Returns the trimmed id.
pub fn validate_room_id(room_id: &str) -> Result<&str, &'static str> {
    let room_id = room_id.trim();
    if room_id.is_empty() {
        return Err("Room id must not be empty");
    }
    if room_id.chars().count() > MAX_ROOM_ID_LEN {
        return Err("Room id must be 128 characters or fewer");
    }
    Ok(room_id)
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One chat message destined for live delivery.
///
/// The same JSON shape is used on the bus and on the client stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Server-assigned snowflake, as a decimal string.
    pub id: String,
    pub room_id: String,
    /// Numeric sender derived from the authenticated user.
    pub sender_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatEvent {
    /// Canonical textual encoding published on the bus.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload received on `topic`.
    ///
    /// Rejects payloads that are not a `ChatEvent`, that carry an empty room,
    /// or whose room does not match the topic they arrived on.
    pub fn decode(topic: &str, payload: &str) -> Result<Self, DecodeError> {
        let event: ChatEvent = serde_json::from_str(payload)?;
        if event.room_id.is_empty() {
            return Err(DecodeError::EmptyRoom);
        }
        if topic_room(topic) != Some(event.room_id.as_str()) {
            return Err(DecodeError::TopicMismatch {
                topic: topic.to_string(),
                room_id: event.room_id,
            });
        }
        Ok(event)
    }
}

/// Why an inbound bus payload was dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not a chat event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chat event has an empty room id")]
    EmptyRoom,
    #[error("event for room `{room_id}` arrived on topic `{topic}`")]
    TopicMismatch { topic: String, room_id: String },
}

/// SSE event name used for chat messages.
pub const STREAM_EVENT_MESSAGE: &str = "message";
