//! Error types for the aggregation pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::NetworkError;
use crate::persistence::PersistenceError;

/// Failure of one source strategy.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The crawling service answered with an error object or a malformed body.
    #[error("crawler error: {message}")]
    Crawler {
        /// Error text from the service, or a description of the bad shape.
        message: String,
    },

    /// The request failed after classified retries.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The strategy ran but found nothing.
    #[error("no items found at {endpoint}")]
    Empty {
        /// The source endpoint.
        endpoint: String,
    },

    /// The pass was superseded or shut down.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Creates a crawler error.
    pub fn crawler(message: impl Into<String>) -> Self {
        Self::Crawler {
            message: message.into(),
        }
    }

    /// Creates an empty-result error.
    pub fn empty(endpoint: impl Into<String>) -> Self {
        Self::Empty {
            endpoint: endpoint.into(),
        }
    }

    /// Whether this is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Network(NetworkError::Cancelled { .. }))
    }
}

/// Per-source failure recorded in a committed aggregation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    /// Id of the failed source.
    pub source_id: String,
    /// Display name of the failed source.
    pub source_name: String,
    /// Last strategy error.
    pub message: String,
}

/// Errors from source registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The descriptor failed validation.
    #[error("invalid source '{id}': {reason}")]
    InvalidSource {
        /// Offending source id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Persisting the source list failed.
    #[error("could not persist sources: {0}")]
    Persistence(#[from] PersistenceError),

    /// Encoding the source list failed.
    #[error("could not encode sources: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Creates a validation error.
    pub fn invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
