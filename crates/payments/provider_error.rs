use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Timeout,
    Connect,
    RateLimited,
    Server,
    NotFound,
    Conflict,
    Rejected,
    Decode,
}

impl Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Connect => "connect",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::Conflict => "conflict",
            ProviderErrorKind::Rejected => "rejected",
            ProviderErrorKind::Decode => "decode",
        };
        write!(f, "{}", kind)
    }
}

/// Failure talking to the payment provider.
///
/// A timeout is never an answer about subscription state: callers must treat it as
/// retryable, not as "no subscription".
#[derive(Debug, Error)]
#[error("payment provider {kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            // a request with the same idempotency key is still in flight
            409 => ProviderErrorKind::Conflict,
            429 => ProviderErrorKind::RateLimited,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Rejected,
        };
        Self::new(kind, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Timeout
                | ProviderErrorKind::Connect
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Conflict
                | ProviderErrorKind::Server
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ProviderErrorKind::Connect
        } else if err.is_decode() || err.is_body() {
            ProviderErrorKind::Decode
        } else if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        } else {
            ProviderErrorKind::Connect
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert!(ProviderError::from_status(429, "slow down").is_retryable());
        assert!(ProviderError::from_status(503, "down").is_retryable());
        assert!(ProviderError::from_status(404, "gone").is_not_found());
        assert!(!ProviderError::from_status(404, "gone").is_retryable());
        assert!(!ProviderError::from_status(400, "bad").is_retryable());
        assert!(ProviderError::timeout("slow").is_retryable());
    }

    #[test]
    fn idempotency_conflict_is_retryable() {
        let err = ProviderError::from_status(409, "idempotency_error");
        assert_eq!(err.kind, ProviderErrorKind::Conflict);
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }
}
