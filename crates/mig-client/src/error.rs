//! Normalized error shape for both platforms
//!
//! Every failure that leaves the call layer is a [`NormalizedError`]:
//! - which system produced it (source, destination, content transport)
//! - which endpoint was involved (already redacted)
//! - the HTTP status, when there was one
//! - a classification ([`ErrorKind`]) the orchestrator can branch on

use serde::{Deserialize, Serialize};
use std::fmt;

/// External system that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    /// Source platform API
    Source,
    /// Destination platform API
    Destination,
    /// Version-control transport (git subprocess)
    Transport,
    /// Local orchestration (store, cancellation, configuration)
    Local,
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            System::Source => "source",
            System::Destination => "destination",
            System::Transport => "transport",
            System::Local => "local",
        };
        f.write_str(name)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection failure or 5xx gateway status
    TransientNetwork,
    /// 429 from the remote side
    RateLimited,
    /// 401/403 or missing credentials
    Authorization,
    /// 404 where absence was not expected
    NotFound,
    /// 409 that the caller did not accept
    Conflict,
    /// Preflight or request validation failure
    Validation,
    /// Content transfer failed; the whole transfer step must be retried
    ContentTransfer,
    /// A hard wall-clock timeout fired
    Timeout,
    /// Operator abort
    Cancelled,
    /// Response body could not be interpreted
    InvalidResponse,
}

impl ErrorKind {
    /// Classify an HTTP status
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            500 | 502 | 503 | 504 => ErrorKind::TransientNetwork,
            400 | 422 => ErrorKind::Validation,
            _ => ErrorKind::InvalidResponse,
        }
    }
}

/// Uniform failure shape regardless of which system produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{system} {endpoint}: {message}{}", status_suffix(.status))]
pub struct NormalizedError {
    /// Producing system
    pub system: System,
    /// Endpoint or operation, redacted
    pub endpoint: String,
    /// HTTP status if a response was received
    pub status: Option<u16>,
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable message, redacted
    pub message: String,
}

impl NormalizedError {
    /// Create new error
    #[inline]
    #[must_use]
    pub fn new(
        system: System,
        endpoint: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            system,
            endpoint: endpoint.into(),
            status: None,
            kind,
            message: message.into(),
        }
    }

    /// Create from an HTTP status and response text
    #[must_use]
    pub fn from_status(
        system: System,
        endpoint: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            system,
            endpoint: endpoint.into(),
            status: Some(status),
            kind: ErrorKind::from_status(status),
            message: message.into(),
        }
    }

    /// Operator abort between steps
    #[must_use]
    pub fn cancelled(endpoint: impl Into<String>) -> Self {
        Self::new(System::Local, endpoint, ErrorKind::Cancelled, "operation cancelled")
    }

    /// Whether the call layer retries this error
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::TransientNetwork | ErrorKind::RateLimited)
    }

    /// Whether this is an authorization failure
    #[inline]
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        self.kind == ErrorKind::Authorization
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Result alias for call-layer operations
pub type CallResult<T> = Result<T, NormalizedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Authorization);
        assert_eq!(ErrorKind::from_status(403), ErrorKind::Authorization);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(409), ErrorKind::Conflict);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::TransientNetwork);
        assert_eq!(ErrorKind::from_status(501), ErrorKind::InvalidResponse);
    }

    #[test]
    fn display_includes_status() {
        let err = NormalizedError::from_status(System::Destination, "GET /_apis/projects", 503, "unavailable");
        let text = err.to_string();
        assert!(text.contains("destination"));
        assert!(text.contains("HTTP 503"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(NormalizedError::from_status(System::Source, "x", 429, "").is_retryable());
        assert!(NormalizedError::from_status(System::Source, "x", 502, "").is_retryable());
        assert!(!NormalizedError::from_status(System::Source, "x", 401, "").is_retryable());
        assert!(!NormalizedError::cancelled("unit").is_retryable());
    }

    #[test]
    fn serializes_snake_case() {
        let err = NormalizedError::from_status(System::Source, "GET /api/v4/user", 401, "denied");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["system"], "source");
        assert_eq!(json["kind"], "authorization");
        assert_eq!(json["status"], 401);
    }
}
