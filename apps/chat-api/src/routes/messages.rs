//! Message creation and lookup endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::events::{validate_room_id, ChatEvent};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages", post(create_message))
        .route("/api/messages/{id}", get(get_message))
}

// ---------------------------------------------------------------------------
// POST /api/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    /// Target room. Defaults to the configured default room when omitted or blank.
    pub room_id: Option<String>,
    /// Must match the authenticated sender when supplied.
    pub sender_id: Option<i64>,
    pub text: Option<String>,
}

/// Create a message and fan it out to every live stream on its room.
///
/// The message is created even if live delivery fails.
#[utoipa::path(
    post,
    path = "/api/messages",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = CreateMessageRequest,
    responses(
        (status = 201, description = "Message created", body = ChatEvent),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn create_message(
    user: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ChatEvent>), ApiError> {
    // A blank room id counts as omitted.
    let room_id = body
        .room_id
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(state.config.default_room.as_str());
    let text = body.text.as_deref().map(str::trim).unwrap_or("");

    let mut errors = Vec::new();
    if let Err(message) = validate_room_id(room_id) {
        errors.push(FieldError {
            field: "roomId".to_string(),
            message: message.to_string(),
        });
    }
    if text.is_empty() {
        errors.push(FieldError {
            field: "text".to_string(),
            message: "Message text is required".to_string(),
        });
    } else if text.chars().count() > state.config.max_message_len {
        errors.push(FieldError {
            field: "text".to_string(),
            message: format!(
                "Message text must be {} characters or fewer",
                state.config.max_message_len
            ),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    if body.sender_id.is_some_and(|id| id != user.sender_id) {
        return Err(ApiError::bad_request(
            "senderId does not match authenticated user",
        ));
    }

    let room_id = room_id.trim();
    let event = state
        .messages
        .create(room_id, user.sender_id, text)
        .await?;

    tracing::debug!(
        event_id = %event.id,
        %room_id,
        user_id = %user.user_id,
        "message created"
    );
    state.bridge.publish(&event).await;

    Ok((StatusCode::CREATED, Json(event)))
}

// ---------------------------------------------------------------------------
// GET /api/messages/{id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/messages/{id}",
    tag = "Messages",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Message", body = ChatEvent),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Message not found", body = ApiErrorBody),
    ),
)]
pub async fn get_message(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatEvent>, ApiError> {
    state
        .messages
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message not found"))
}
