// ── HTTP Authentication ────────────────────────────────────────────────────
// Validates the transport-signed token the companion client forwards in
// the `X-Telegram-Init-Data` header.
//
// Check-string algorithm: parse the URL-encoded payload into key=value
// pairs, drop `hash`, sort pairs alphabetically, join as `k=v` lines,
// then verify HMAC-SHA256(secret, check_string) where
// secret = HMAC-SHA256("WebAppData", bot_token). Tokens older than 24
// hours are rejected. The authenticated user id is the only trust
// boundary for per-user scoping.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use super::ApiError;
use crate::atoms::constants::AUTH_MAX_AGE_HOURS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::state::EngineState;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_HEADER: &str = "x-telegram-init-data";

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
}

/// Validate a signed token payload against the bot token at instant `now`.
pub fn validate_init_data(init_data: &str, bot_token: &str, now: DateTime<Utc>) -> EngineResult<AuthUser> {
    if bot_token.is_empty() {
        return Err(EngineError::Auth("auth is not configured".into()));
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut received_hash: Option<String> = None;
    for piece in init_data.split('&') {
        let Some((key, value)) = piece.split_once('=') else { continue };
        let key = urlencoding::decode(key)
            .map_err(|_| EngineError::Auth("malformed token encoding".into()))?
            .into_owned();
        let value = urlencoding::decode(value)
            .map_err(|_| EngineError::Auth("malformed token encoding".into()))?
            .into_owned();
        if key == "hash" {
            received_hash = Some(value);
        } else {
            pairs.push((key, value));
        }
    }
    let received_hash = received_hash.ok_or(EngineError::Auth("missing hash in token".into()))?;
    let received_hash =
        hex::decode(&received_hash).map_err(|_| EngineError::Auth("malformed hash".into()))?;

    pairs.sort();
    let check_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    // secret = HMAC-SHA256(key = "WebAppData", message = bot_token)
    let mut secret = HmacSha256::new_from_slice(b"WebAppData").expect("hmac accepts any key size");
    secret.update(bot_token.as_bytes());
    let secret = secret.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret).expect("hmac accepts any key size");
    mac.update(check_string.as_bytes());
    mac.verify_slice(&received_hash)
        .map_err(|_| EngineError::Auth("invalid token signature".into()))?;

    // Freshness window.
    let auth_date = pairs
        .iter()
        .find(|(k, _)| k == "auth_date")
        .and_then(|(_, v)| v.parse::<i64>().ok())
        .filter(|ts| *ts > 0)
        .ok_or(EngineError::Auth("missing auth_date".into()))?;
    let issued = DateTime::from_timestamp(auth_date, 0)
        .ok_or(EngineError::Auth("invalid auth_date".into()))?;
    if now - issued > Duration::hours(AUTH_MAX_AGE_HOURS) {
        return Err(EngineError::Auth("token expired".into()));
    }

    // User payload.
    let user_json = pairs
        .iter()
        .find(|(k, _)| k == "user")
        .map(|(_, v)| v.clone())
        .ok_or(EngineError::Auth("missing user in token".into()))?;
    let user: serde_json::Value = serde_json::from_str(&user_json)
        .map_err(|_| EngineError::Auth("invalid user JSON in token".into()))?;
    let id = user["id"].as_i64().ok_or(EngineError::Auth("user id missing".into()))?;

    Ok(AuthUser { id })
}

impl FromRequestParts<Arc<EngineState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<EngineState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError(EngineError::Auth("missing auth header".into())))?;
        let user = validate_init_data(header, &state.config.bot_token, Utc::now())?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "12345:test-token";

    /// Build a correctly-signed init-data payload, mirroring the signer.
    fn signed_payload(user_id: i64, auth_date: i64) -> String {
        let user_json = format!("{{\"id\":{user_id},\"first_name\":\"Test\"}}");
        let mut pairs = vec![
            ("auth_date".to_string(), auth_date.to_string()),
            ("query_id".to_string(), "AAE1".to_string()),
            ("user".to_string(), user_json),
        ];
        pairs.sort();
        let check_string = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut secret = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        secret.update(BOT_TOKEN.as_bytes());
        let secret = secret.finalize().into_bytes();
        let mut mac = HmacSha256::new_from_slice(&secret).unwrap();
        mac.update(check_string.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .chain(std::iter::once(format!("hash={hash}")))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[test]
    fn valid_token_authenticates() {
        let now = Utc::now();
        let payload = signed_payload(777, now.timestamp());
        let user = validate_init_data(&payload, BOT_TOKEN, now).unwrap();
        assert_eq!(user.id, 777);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = Utc::now();
        let payload = signed_payload(777, now.timestamp());
        // Swap the user id after signing.
        let tampered = payload.replace("%22id%22%3A777", "%22id%22%3A888");
        assert!(validate_init_data(&tampered, BOT_TOKEN, now).is_err());
    }

    #[test]
    fn stale_token_is_rejected() {
        let now = Utc::now();
        let stale = now - Duration::hours(AUTH_MAX_AGE_HOURS + 1);
        let payload = signed_payload(777, stale.timestamp());
        let err = validate_init_data(&payload, BOT_TOKEN, now).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn missing_hash_is_rejected() {
        let now = Utc::now();
        assert!(validate_init_data("auth_date=1&user=%7B%7D", BOT_TOKEN, now).is_err());
    }

    #[test]
    fn wrong_bot_token_is_rejected() {
        let now = Utc::now();
        let payload = signed_payload(777, now.timestamp());
        assert!(validate_init_data(&payload, "другой:токен", now).is_err());
    }
}
