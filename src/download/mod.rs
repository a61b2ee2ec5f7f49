//! HTTP delivery of queued items to disk.
//!
//! - Streaming writes through an exclusively created `.part` file, renamed on completion
//! - Redirect hops re-checked against the locator host policy
//! - Progress percentage reporting when `Content-Length` is known
//! - Cooperative cancellation between body chunks
//! - Safe filenames derived from job titles
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::download::HttpClient;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let delivered = client
//!     .deliver(
//!         "https://example.com/clip.mp4",
//!         Path::new("./downloads"),
//!         "clip.mp4",
//!         &|percent| println!("{percent}%"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("Saved to {}", delivered.path.display());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod filename;

pub use client::{DeliveredFile, HttpClient};
pub use constants::DEFAULT_USER_AGENT;
pub use error::DownloadError;
pub use filename::safe_filename;
