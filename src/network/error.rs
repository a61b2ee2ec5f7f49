//! Error types and classification for recovery fetches.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed network attempt.
///
/// Drives the retry decision in [`RetryPolicy`](super::RetryPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// The attempt did not complete within the per-attempt timeout.
    Timeout,
    /// Policy-level rejection (401/403/407/451). Retrying cannot change it.
    CorsLike,
    /// DNS, connect or transport-level failure.
    ConnectionFailure,
    /// 5xx response.
    ServerError,
    /// Anything else, including unexpected 4xx responses.
    Unknown,
}

impl NetworkErrorKind {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::CorsLike => "cors_like",
            Self::ConnectionFailure => "connection_failure",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by [`NetworkRecoveryManager`](super::NetworkRecoveryManager).
#[derive(Debug, Error)]
pub enum NetworkError {
    /// All permitted attempts failed; carries the last classification.
    #[error("{kind} fetching {resource} after {attempts} attempt(s): {message}")]
    Failed {
        /// The resource that failed.
        resource: String,
        /// Classification of the last failure.
        kind: NetworkErrorKind,
        /// Message of the last failure.
        message: String,
        /// HTTP status of the last failure, when a response was received.
        status: Option<u16>,
        /// Total attempts made.
        attempts: u32,
    },

    /// An identical request is already running; callers must de-duplicate.
    #[error("request for {resource} already in progress")]
    AlreadyInProgress {
        /// The duplicated resource.
        resource: String,
    },

    /// The resource string could not be turned into a request.
    #[error("invalid resource locator: {resource}")]
    InvalidResource {
        /// The rejected resource.
        resource: String,
    },

    /// The caller's cancellation token fired.
    #[error("fetch of {resource} cancelled")]
    Cancelled {
        /// The resource being fetched.
        resource: String,
    },
}

impl NetworkError {
    /// Returns the classification for exhausted fetches, `None` otherwise.
    #[must_use]
    pub fn kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Creates an in-progress rejection.
    pub fn already_in_progress(resource: impl Into<String>) -> Self {
        Self::AlreadyInProgress {
            resource: resource.into(),
        }
    }

    /// Creates an invalid-resource error.
    pub fn invalid_resource(resource: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource: resource.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(resource: impl Into<String>) -> Self {
        Self::Cancelled {
            resource: resource.into(),
        }
    }
}

/// A single classified attempt failure, before retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Classification.
    pub kind: NetworkErrorKind,
    /// Human-readable message.
    pub message: String,
    /// HTTP status when a response arrived.
    pub status: Option<u16>,
}

impl AttemptFailure {
    pub(crate) fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: NetworkErrorKind::Timeout,
            message: format!("no response within {}ms", after.as_millis()),
            status: None,
        }
    }

    pub(crate) fn from_status(status: u16) -> Self {
        Self {
            kind: classify_status(status),
            message: format!("HTTP {status}"),
            status: Some(status),
        }
    }

    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            kind: classify_reqwest_error(error),
            message: error.to_string(),
            status: error.status().map(|s| s.as_u16()),
        }
    }

    pub(crate) fn into_error(self, resource: &str, attempts: u32) -> NetworkError {
        NetworkError::Failed {
            resource: resource.to_string(),
            kind: self.kind,
            message: self.message,
            status: self.status,
            attempts,
        }
    }
}

/// Classifies an HTTP status code.
///
/// | Status | Kind |
/// |--------|------|
/// | 401, 403, 407, 451 | `CorsLike` |
/// | 408 | `Timeout` |
/// | 5xx | `ServerError` |
/// | other | `Unknown` |
#[must_use]
pub fn classify_status(status: u16) -> NetworkErrorKind {
    match status {
        401 | 403 | 407 | 451 => NetworkErrorKind::CorsLike,
        408 => NetworkErrorKind::Timeout,
        500..=599 => NetworkErrorKind::ServerError,
        _ => NetworkErrorKind::Unknown,
    }
}

/// Classifies a transport error by its shape.
#[must_use]
pub fn classify_reqwest_error(error: &reqwest::Error) -> NetworkErrorKind {
    if error.is_timeout() {
        NetworkErrorKind::Timeout
    } else if let Some(status) = error.status() {
        classify_status(status.as_u16())
    } else if error.is_connect() || error.is_request() {
        NetworkErrorKind::ConnectionFailure
    } else {
        NetworkErrorKind::Unknown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_policy_statuses_as_cors_like() {
        for status in [401, 403, 407, 451] {
            assert_eq!(classify_status(status), NetworkErrorKind::CorsLike);
        }
    }

    #[test]
    fn test_classify_server_errors() {
        for status in [500, 502, 503, 504, 599] {
            assert_eq!(classify_status(status), NetworkErrorKind::ServerError);
        }
    }

    #[test]
    fn test_classify_request_timeout_status() {
        assert_eq!(classify_status(408), NetworkErrorKind::Timeout);
    }

    #[test]
    fn test_classify_other_client_errors_unknown() {
        assert_eq!(classify_status(404), NetworkErrorKind::Unknown);
        assert_eq!(classify_status(410), NetworkErrorKind::Unknown);
    }

    #[test]
    fn test_failed_error_display_mentions_kind_and_resource() {
        let err = AttemptFailure::from_status(503).into_error("https://a.test/x", 4);
        let msg = err.to_string();
        assert!(msg.contains("server_error"), "{msg}");
        assert!(msg.contains("https://a.test/x"), "{msg}");
        assert!(msg.contains("4 attempt"), "{msg}");
        assert_eq!(err.kind(), Some(NetworkErrorKind::ServerError));
    }

    #[test]
    fn test_non_failed_errors_have_no_kind() {
        assert_eq!(NetworkError::already_in_progress("r").kind(), None);
        assert_eq!(NetworkError::cancelled("r").kind(), None);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&NetworkErrorKind::ConnectionFailure).unwrap();
        assert_eq!(json, "\"connection_failure\"");
    }
}
