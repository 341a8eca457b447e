//! Unverified JWT payload decoding
//!
//! Claims decoded here are for display only. Nothing in this crate treats them
//! as verified identity; the backend validates every token it receives.

use crate::models::UserProfile;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Decode a JWT payload segment without verifying the signature
///
/// # Errors
///
/// Returns an error if:
/// - The JWT format is invalid (not 3 parts separated by dots)
/// - Base64 decoding fails
/// - UTF-8 decoding fails
/// - JSON parsing fails
pub fn decode_jwt_payload(token: &str) -> Result<Value, String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid JWT format".to_string());
    }

    let payload_b64 = parts[1];
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| general_purpose::STANDARD.decode(payload_b64))
        .map_err(|_| "Base64 decode failed")?;

    let payload_str = String::from_utf8(payload_bytes).map_err(|_| "UTF-8 decode failed")?;

    serde_json::from_str(&payload_str).map_err(|_| "JSON parse failed".to_string())
}

/// Build a best-effort display profile from identity token claims
///
/// Uses `given_name`/`family_name`, then `name`, then the email local part,
/// and finally "User" for the first name.
#[must_use]
pub fn profile_from_claims(claims: &Value) -> UserProfile {
    let claim = |key: &str| {
        claims
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let email = claim("email");
    let (first_name, last_name) = match (claim("given_name"), claim("family_name")) {
        (Some(given), family) => (given, family.unwrap_or_default()),
        (None, family) => {
            let first = claim("name")
                .or_else(|| {
                    email
                        .as_deref()
                        .and_then(|e| e.split('@').next())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "User".to_string());
            (first, family.unwrap_or_default())
        }
    };

    UserProfile {
        first_name,
        last_name,
        email,
        sub: claim("sub"),
    }
}

/// Decode a token straight to a display profile; `None` if it is not a JWT
#[must_use]
pub fn profile_from_token(token: &str) -> Option<UserProfile> {
    match decode_jwt_payload(token) {
        Ok(claims) => Some(profile_from_claims(&claims)),
        Err(e) => {
            log::debug!("Token payload not decodable for display profile: {e}");
            None
        }
    }
}

/// `exp` claim of a token, if present
#[must_use]
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let claims = decode_jwt_payload(token).ok()?;
    let exp = claims.get("exp").and_then(Value::as_i64)?;
    Utc.timestamp_opt(exp, 0).single()
}
