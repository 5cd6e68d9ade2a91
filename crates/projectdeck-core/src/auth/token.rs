//! Reading the expiry claim out of a bearer token.
//!
//! Tokens are compact three-segment strings (`header.claims.signature`).
//! The signature is never verified here; the server does that. The client
//! only needs `exp` to decide whether to keep using the token.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token does not have three segments")]
    Malformed,

    #[error("claims segment is not valid base64")]
    Encoding,

    #[error("claims segment is not a JSON object: {0}")]
    Claims(String),

    #[error("claims carry no numeric exp")]
    MissingExpiry,
}

/// The claims the client cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch
    pub exp: f64,
    pub sub: Option<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis((self.exp * 1000.0) as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp < epoch_seconds(now)
    }

    /// Seconds left before expiry; negative once expired
    pub fn seconds_remaining_at(&self, now: DateTime<Utc>) -> f64 {
        self.exp - epoch_seconds(now)
    }
}

fn epoch_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|_| TokenError::Encoding)
}

/// Decode the claims segment of `token` without verifying its signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed);
    }

    let bytes = decode_segment(segments[1])?;
    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Claims(e.to_string()))?;
    let Value::Object(claims) = claims else {
        return Err(TokenError::Claims("not an object".to_string()));
    };

    let exp = claims
        .get("exp")
        .and_then(Value::as_f64)
        .ok_or(TokenError::MissingExpiry)?;
    let sub = claims.get("sub").and_then(|s| match s {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(TokenClaims { exp, sub })
}

/// Whether `token` is expired at `now`. Tokens whose claims cannot be
/// decoded count as expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.is_expired_at(now),
        Err(e) => {
            tracing::debug!(error = %e, "Unreadable token claims, treating as expired");
            true
        }
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}
