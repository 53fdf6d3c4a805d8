use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorDetails};
use crate::metrics::GatekeeperMetrics;

const BEARER_PREFIX: &str = "Bearer ";
const USER_PREFIX: &str = "USER";
const ORDINAL_DIGITS: usize = 3;

/// Caller identity derived from a `Bearer USERnnn` credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// The three digits following `USER`, leading zeros kept. Used as the counter key.
    key: String,
    /// The same digits as a number. Used for cohort math and display.
    ordinal: u16,
}

impl Identity {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// Parse the raw `Authorization` header value.
    ///
    /// The value must be exactly `Bearer USER` followed by three ASCII digits,
    /// with nothing before or after.
    pub fn from_authorization(value: &str) -> Result<Self, Error> {
        Self::parse(value).ok_or_else(|| Error::new_without_logging(ErrorDetails::Unauthenticated))
    }

    fn parse(value: &str) -> Option<Self> {
        let digits = value
            .strip_prefix(BEARER_PREFIX)?
            .strip_prefix(USER_PREFIX)?;
        if digits.len() != ORDINAL_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ordinal = digits.parse().ok()?;
        Some(Self {
            key: digits.to_string(),
            ordinal,
        })
    }

    /// Pull the identity out of request headers
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::new_without_logging(ErrorDetails::Unauthenticated))?;
        Self::from_authorization(value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "USER{}", self.key)
    }
}

/// Authentication middleware. Rejects the request with a 401 unless it carries a
/// well-formed credential, otherwise stores the [`Identity`] in request extensions.
pub async fn require_identity(
    State(metrics): State<Arc<GatekeeperMetrics>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let identity = match Identity::from_headers(request.headers()) {
        Ok(identity) => identity,
        Err(e) => {
            metrics.record_unauthenticated();
            tracing::warn!(path = %request.uri().path(), "Rejected request without valid credential");
            return Err(e);
        }
    };

    tracing::debug!(user = %identity, "Authenticated request");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
