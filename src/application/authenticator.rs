//! Shared-secret request signatures.
//!
//! A signed request carries `X-Request-Signature`, `X-Request-Timestamp` and
//! `X-Request-Nonce`. The signature is the hex HMAC-SHA256 of
//! `body || timestamp || nonce`, with the timestamp exactly as sent.
//! State-changing methods also carry a well-formed `X-Idempotency-Key`.

use crate::config::Secret;
use axum::http::{HeaderMap, Method};
use chrono::Utc;
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-request-signature";
pub const TIMESTAMP_HEADER: &str = "x-request-timestamp";
pub const NONCE_HEADER: &str = "x-request-nonce";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

fn nonce_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{16,64}$").expect("static nonce pattern"))
}

fn idempotency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{16,64}$").expect("static idempotency pattern"))
}

/// Why a credential was refused. Only ever logged; callers see a uniform
/// authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no shared secret configured")]
    MissingSecret,
    #[error("shared secret cannot key the mac")]
    InvalidSecret,
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("timestamp is not an integer")]
    InvalidTimestamp,
    #[error("timestamp is {skew}s away from server time")]
    StaleTimestamp { skew: i64 },
    #[error("nonce has an invalid format")]
    InvalidNonce,
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("idempotency key missing")]
    MissingIdempotencyKey,
    #[error("idempotency key has an invalid format")]
    InvalidIdempotencyKey,
}

/// Methods that must carry an idempotency key.
pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthFailure> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthFailure::MissingHeader(name))
}

fn mac_for(secret: &Secret, body: &[u8], timestamp: &str, nonce: &str) -> Result<HmacSha256, AuthFailure> {
    let mut mac = HmacSha256::new_from_slice(secret.expose().as_bytes())
        .map_err(|_| AuthFailure::InvalidSecret)?;
    mac.update(body);
    mac.update(timestamp.as_bytes());
    mac.update(nonce.as_bytes());
    Ok(mac)
}

/// Hex signature a client attaches to a request.
pub fn sign(secret: &Secret, body: &[u8], timestamp: &str, nonce: &str) -> Result<String, AuthFailure> {
    let mac = mac_for(secret, body, timestamp, nonce)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
pub struct RequestAuthenticator {
    secret: Option<Secret>,
    freshness: Duration,
}

impl RequestAuthenticator {
    pub fn new(secret: Option<Secret>, freshness: Duration) -> Self {
        Self { secret, freshness }
    }

    pub fn verify(&self, method: &Method, headers: &HeaderMap, body: &[u8]) -> Result<(), AuthFailure> {
        self.verify_at(method, headers, body, Utc::now().timestamp())
    }

    /// Checks run in a fixed order and stop at the first failure.
    pub fn verify_at(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
        now_secs: i64,
    ) -> Result<(), AuthFailure> {
        let secret = self.secret.as_ref().ok_or(AuthFailure::MissingSecret)?;

        let signature = header(headers, SIGNATURE_HEADER)?;
        let timestamp = header(headers, TIMESTAMP_HEADER)?;
        let nonce = header(headers, NONCE_HEADER)?;

        let sent_at: i64 = timestamp.parse().map_err(|_| AuthFailure::InvalidTimestamp)?;
        let skew = now_secs.saturating_sub(sent_at);
        if skew.unsigned_abs() > self.freshness.as_secs() {
            return Err(AuthFailure::StaleTimestamp { skew });
        }

        if !nonce_pattern().is_match(nonce) {
            return Err(AuthFailure::InvalidNonce);
        }

        let supplied = hex::decode(signature).map_err(|_| AuthFailure::SignatureMismatch)?;
        mac_for(secret, body, timestamp, nonce)?
            .verify_slice(&supplied)
            .map_err(|_| AuthFailure::SignatureMismatch)?;

        if is_state_changing(method) {
            let key = header(headers, IDEMPOTENCY_HEADER).map_err(|_| AuthFailure::MissingIdempotencyKey)?;
            if !idempotency_pattern().is_match(key) {
                return Err(AuthFailure::InvalidIdempotencyKey);
            }
        }
        Ok(())
    }
}
