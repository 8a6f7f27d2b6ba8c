//! Bearer token extractors.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::auth::tokens::{self, AuthContext};
use crate::AppState;

/// Authenticated caller extracted from the `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub sender_id: i64,
}

impl From<AuthContext> for AuthUser {
    fn from(ctx: AuthContext) -> Self {
        Self {
            user_id: ctx.user_id,
            sender_id: ctx.sender_id,
        }
    }
}

/// Authenticated caller for the live stream route.
///
/// Same as [`AuthUser`], but when no `Authorization` header is sent the token
/// may be passed as `?token=<jwt>` instead, for clients (e.g. `EventSource`)
/// that cannot set headers. Only the stream route uses this extractor.
#[derive(Debug, Clone)]
pub struct StreamAuthUser(pub AuthUser);

/// Rejection returned when the bearer token is missing or invalid.
#[derive(Debug)]
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = header_token(parts)?.ok_or(AuthError {
            message: "Missing Authorization header",
        })?;
        verify(state, token)
    }
}

impl FromRequestParts<AppState> for StreamAuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // A header, when present, is authoritative; the query is a fallback.
        if let Some(token) = header_token(parts)? {
            return verify(state, token).map(StreamAuthUser);
        }

        let query = Query::<TokenQuery>::try_from_uri(&parts.uri).map_err(|_| AuthError {
            message: "Invalid query string",
        })?;
        let token = query
            .0
            .token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError {
                message: "Missing Authorization header or token parameter",
            })?;
        verify(state, &token).map(StreamAuthUser)
    }
}

/// The bearer token from the `Authorization` header, if the header is present.
fn header_token(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header.to_str().map_err(|_| AuthError {
        message: "Invalid Authorization header format",
    })?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError {
        message: "Invalid Authorization header format",
    })?;
    Ok(Some(token))
}

fn verify(state: &AppState, token: &str) -> Result<AuthUser, AuthError> {
    tokens::verify_access_token(&state.jwt, token)
        .map(AuthUser::from)
        .map_err(|_| AuthError {
            message: "Invalid or expired token",
        })
}
