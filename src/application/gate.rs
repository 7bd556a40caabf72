//! Admission control: rate limit first, then signature checks.

use super::authenticator::RequestAuthenticator;
use super::limiter::{RateDecision, SlidingWindowLimiter};
use axum::http::{HeaderMap, Method};
use thiserror::Error;
use tracing::warn;

/// Identity shared by every caller that arrives without proxy headers.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionRejection {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    Unauthenticated,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves the caller from proxy headers: `CF-Connecting-IP`, then the first
/// hop of `X-Forwarded-For`, then `X-Real-IP`.
pub fn client_identity(headers: &HeaderMap) -> String {
    if let Some(ip) = header_value(headers, "cf-connecting-ip") {
        return ip.to_string();
    }
    if let Some(first) = header_value(headers, "x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return first.to_string();
    }
    if let Some(ip) = header_value(headers, "x-real-ip") {
        return ip.to_string();
    }
    UNKNOWN_CLIENT.to_string()
}

pub struct AdmissionGate {
    limiter: SlidingWindowLimiter,
    authenticator: RequestAuthenticator,
}

impl AdmissionGate {
    pub fn new(limiter: SlidingWindowLimiter, authenticator: RequestAuthenticator) -> Self {
        Self {
            limiter,
            authenticator,
        }
    }

    /// Decides on one request. The first failing check wins; a rejected
    /// request leaves no trace beyond its released limiter slot.
    pub async fn validate(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), AdmissionRejection> {
        let client = client_identity(headers);

        if let RateDecision::Limited { count } = self.limiter.check(&client).await {
            warn!(client = %client, %method, path, count, "rejecting request: rate limit exceeded");
            return Err(AdmissionRejection::RateLimited);
        }

        if *method == Method::OPTIONS {
            return Ok(());
        }

        if let Err(reason) = self.authenticator.verify(method, headers, body) {
            warn!(client = %client, %method, path, reason = %reason, "rejecting request: authentication failed");
            return Err(AdmissionRejection::Unauthenticated);
        }
        Ok(())
    }
}
