//! Download queue: admission, dispatch and lifecycle of delivery jobs.
//!
//! # Overview
//!
//! - [`DownloadQueueManager`] - validated submission, FIFO dispatch bounded by
//!   a concurrency limit and a per-pass rate limit, circuit breaking, retry,
//!   cancellation and cleanup
//! - [`DownloadJob`] / [`JobStatus`] - job records handed back to callers
//! - [`DeliveryChain`] / [`DeliveryStrategy`] - ordered fallbacks that move a
//!   job's bytes to disk
//! - [`validate_locator`] - the admission gate every locator passes first
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvester_core::config::{QueueConfig, RecoveryConfig};
//! use harvester_core::download::HttpClient;
//! use harvester_core::network::NetworkRecoveryManager;
//! use harvester_core::queue::{DownloadQueueManager, LocatorPolicy, build_default_delivery_chain};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recovery = Arc::new(NetworkRecoveryManager::new(RecoveryConfig::default())?);
//! let chain = build_default_delivery_chain(
//!     HttpClient::new()?,
//!     recovery,
//!     "./downloads",
//!     LocatorPolicy::strict(),
//! );
//! let queue = DownloadQueueManager::new(QueueConfig::default(), chain);
//!
//! let id = queue.submit("Trailer", "movie", "https://cdn.example.com/trailer.mp4")?;
//! println!("{:?}", queue.status(id).map(|job| job.status));
//! # Ok(())
//! # }
//! ```

mod breaker;
mod error;
mod item;
mod manager;
mod snapshot;
mod strategy;
mod validation;

pub use error::{DeliveryError, QueueError};
pub use item::{DownloadJob, JobId, JobStatus};
pub use manager::{DownloadQueueManager, QueueStats};
pub use snapshot::QueueSnapshot;
pub use strategy::{
    AlternativeLocatorDelivery, Delivery, DeliveryChain, DeliveryContext, DeliveryRequest,
    DeliveryStrategy, DirectDelivery, RecoveryAssistedDelivery, build_default_delivery_chain,
};
pub use validation::{
    DEFAULT_CATEGORY, LocatorPolicy, MAX_TITLE_CHARS, ValidationError, validate_category,
    validate_locator, validate_title,
};
