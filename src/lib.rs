//! Harvester Core Library
//!
//! Aggregates media items from user-configured sources and delivers them to
//! disk through a bounded, rate-limited download queue.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`aggregation`] - source registry, debounced aggregation passes, crawler client
//! - [`queue`] - job validation, admission control, circuit breaker, delivery chain
//! - [`network`] - retrying fetch, alternative locators, error history
//! - [`download`] - streaming HTTP delivery with progress and cancellation
//! - [`persistence`] - key-value store for sources and queue snapshots
//! - [`config`] - defaults and the optional config file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregation;
pub mod config;
pub mod download;
pub mod network;
pub mod persistence;
pub mod queue;

// Re-export commonly used types
pub use aggregation::{
    AggregationSnapshot, ContentAggregationPipeline, ContentItem, HttpCrawler, SourceDescriptor,
    SourceRegistry, build_default_source_chain,
};
pub use config::{HarvesterConfig, PipelineConfig, QueueConfig, RecoveryConfig};
pub use download::{DeliveredFile, DownloadError, HttpClient};
pub use network::{NetworkError, NetworkErrorKind, NetworkRecoveryManager, RetryPolicy};
pub use persistence::{FileStore, KeyValueStore, MemoryStore, PersistenceError};
pub use queue::{
    DeliveryChain, DownloadJob, DownloadQueueManager, JobId, JobStatus, LocatorPolicy,
    QueueStats, build_default_delivery_chain,
};
