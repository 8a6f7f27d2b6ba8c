//! Bearer access tokens (HS256 JWT).

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::ApiError;

/// Default lifetime of tokens minted by [`mint_access_token`].
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Keys and expectations for verifying (and, in dev/tests, minting) tokens.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl JwtKeys {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.jwt_secret, &config.jwt_issuer)
    }
}

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (the user id).
    pub sub: String,
    /// Issued-at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Numeric sender id, when the issuer assigns one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
}

/// Who is calling, as far as the chat subsystem cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub sender_id: i64,
}

impl From<AccessClaims> for AuthContext {
    fn from(claims: AccessClaims) -> Self {
        let sender_id = claims
            .sender_id
            .unwrap_or_else(|| derive_sender_id(&claims.sub));
        Self {
            user_id: claims.sub,
            sender_id,
        }
    }
}

/// Stable numeric sender id for a user id: the first four bytes of its
/// SHA-256, read as an unsigned 32-bit integer. Identical on every process.
pub fn derive_sender_id(user_id: &str) -> i64 {
    let digest = Sha256::digest(user_id.as_bytes());
    let bytes = [digest[0], digest[1], digest[2], digest[3]];
    u32::from_be_bytes(bytes) as i64
}

/// Verify a bearer token and return the caller's identity.
pub fn verify_access_token(keys: &JwtKeys, token: &str) -> Result<AuthContext, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[keys.issuer.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let data = jsonwebtoken::decode::<AccessClaims>(token, &keys.decoding, &validation)
        .map_err(|e| {
            tracing::debug!(?e, "access token validation failed");
            ApiError::unauthorized("Invalid or expired token")
        })?;

    Ok(data.claims.into())
}

/// Mint a signed access token for `user_id`.
pub fn mint_access_token(
    keys: &JwtKeys,
    user_id: &str,
    sender_id: Option<i64>,
    ttl_secs: i64,
) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = AccessClaims {
        iss: keys.issuer.clone(),
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        sender_id,
    };

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).map_err(|e| {
        tracing::error!(?e, "failed to sign access token");
        ApiError::internal("Token signing failed")
    })
}
