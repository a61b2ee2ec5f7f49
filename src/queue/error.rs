//! Error types for queue delivery and persistence.

use thiserror::Error;

use crate::download::DownloadError;
use crate::network::NetworkError;
use crate::persistence::PersistenceError;

/// Failure of one delivery strategy, or of the whole chain.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transfer failed (HTTP status, IO, timeout).
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Recovery probe failed after retries.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// No alternative locator responded.
    #[error("no reachable alternative locator for {locator} ({candidates} tried)")]
    NoAlternative {
        /// The original locator.
        locator: String,
        /// How many candidates were probed.
        candidates: usize,
    },

    /// The job's cancellation token fired.
    #[error("delivery of {locator} cancelled")]
    Cancelled {
        /// The locator being delivered.
        locator: String,
    },

    /// The chain has no strategies registered.
    #[error("no delivery strategies registered")]
    NoStrategies,

    /// Every strategy of the chain failed.
    #[error("all {attempted} delivery strategies failed; last error: {last}")]
    Exhausted {
        /// Number of strategies that ran.
        attempted: usize,
        /// Error from the last strategy.
        #[source]
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Creates a cancellation error.
    pub fn cancelled(locator: impl Into<String>) -> Self {
        Self::Cancelled {
            locator: locator.into(),
        }
    }

    /// Whether this error (or the last error of an exhausted chain) is a
    /// cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. }
            | Self::Download(DownloadError::Cancelled { .. })
            | Self::Network(NetworkError::Cancelled { .. }) => true,
            Self::Exhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

/// Errors from queue snapshot persistence.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed.
    #[error("queue snapshot storage failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// The snapshot could not be encoded.
    #[error("queue snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_display_includes_last_error() {
        let err = DeliveryError::Exhausted {
            attempted: 3,
            last: Box::new(DeliveryError::NoAlternative {
                locator: "https://a.test/v.mp4".to_string(),
                candidates: 4,
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("all 3 delivery strategies failed"), "{msg}");
        assert!(msg.contains("https://a.test/v.mp4"), "{msg}");
    }

    #[test]
    fn test_is_cancelled_sees_through_wrappers() {
        assert!(DeliveryError::cancelled("x").is_cancelled());
        assert!(DeliveryError::from(DownloadError::cancelled("x")).is_cancelled());
        assert!(DeliveryError::from(NetworkError::cancelled("x")).is_cancelled());
        let exhausted = DeliveryError::Exhausted {
            attempted: 1,
            last: Box::new(DeliveryError::cancelled("x")),
        };
        assert!(exhausted.is_cancelled());
        assert!(!DeliveryError::from(DownloadError::timeout("x")).is_cancelled());
    }
}
