//! Live stream endpoint: Server-Sent Events for one room.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::future;
use futures_util::stream::{Stream, StreamExt};

use crate::auth::middleware::StreamAuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

use super::events::{validate_room_id, ChatEvent, STREAM_EVENT_MESSAGE};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/messages/stream/{room_id}", get(stream_room))
}

// ---------------------------------------------------------------------------
// GET /api/messages/stream/{room_id}
// ---------------------------------------------------------------------------

/// Stream new messages for a room as they are created.
///
/// Nothing created before the connection opened is sent. The subscription
/// lives exactly as long as the response body: a client disconnect drops the
/// body, which closes the subscription.
#[utoipa::path(
    get,
    path = "/api/messages/stream/{room_id}",
    tag = "Stream",
    security(("bearer" = [])),
    params(
        ("room_id" = String, Path, description = "Room ID"),
        (
            "token" = Option<String>,
            Query,
            description = "Access token, used only when no Authorization header is sent"
        ),
    ),
    responses(
        (
            status = 200,
            description = "Event stream; each `message` event carries one ChatEvent",
            content_type = "text/event-stream",
            body = ChatEvent
        ),
        (status = 400, description = "Invalid room ID", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn stream_room(
    StreamAuthUser(user): StreamAuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // TODO: room-level access control; any authenticated user may stream any room.
    let room_id = validate_room_id(&room_id).map_err(ApiError::bad_request)?;

    let subscription = state.registry.subscribe(room_id);
    tracing::info!(
        room_id = %subscription.room_id(),
        user_id = %user.user_id,
        subscription_id = %subscription.id(),
        "live stream opened"
    );

    let events = subscription
        .into_stream()
        .filter_map(|event| future::ready(to_sse_event(&event)))
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.stream_keepalive)))
}

fn to_sse_event(event: &ChatEvent) -> Option<Event> {
    match Event::default()
        .event(STREAM_EVENT_MESSAGE)
        .id(&event.id)
        .json_data(event)
    {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "failed to encode stream event");
            None
        }
    }
}
