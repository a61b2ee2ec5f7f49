//! Network recovery layer shared by the download queue and the aggregation
//! pipeline.
//!
//! - [`NetworkRecoveryManager`] - retrying fetch, alternative locators, probing
//! - [`RetryPolicy`] - exponential backoff with a capped delay
//! - [`NetworkErrorKind`] - the five-way failure classification
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::config::RecoveryConfig;
//! use harvester_core::network::{FetchOptions, NetworkRecoveryManager, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recovery = NetworkRecoveryManager::new(RecoveryConfig::default())?;
//! let response = recovery
//!     .fetch_with_retry("https://example.com/feed", &FetchOptions::get(), &RetryPolicy::default())
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

mod error;
mod history;
mod locators;
mod recovery;
mod retry;

pub use error::{NetworkError, NetworkErrorKind, classify_reqwest_error, classify_status};
pub use history::NetworkErrorRecord;
pub use locators::alternative_locators;
pub use recovery::{FetchOptions, MAX_TEXT_BODY_BYTES, NetworkRecoveryManager};
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
