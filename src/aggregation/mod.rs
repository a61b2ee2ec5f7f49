//! Content aggregation across user-configured sources.
//!
//! - [`SourceRegistry`] - persisted source list, published on a `watch` channel
//! - [`ContentAggregationPipeline`] - debounced passes, one fetch chain per
//!   enabled source, last-epoch-wins commits
//! - [`SourceChain`] - crawler → direct extraction → placeholder fallbacks
//! - [`HttpCrawler`] - client for the external crawling service
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvester_core::aggregation::{
//!     ContentAggregationPipeline, HttpCrawler, SourceDescriptor, SourceRegistry,
//!     build_default_source_chain,
//! };
//! use harvester_core::config::{PipelineConfig, RecoveryConfig};
//! use harvester_core::network::NetworkRecoveryManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recovery = Arc::new(NetworkRecoveryManager::new(RecoveryConfig::default())?);
//! let crawler = Arc::new(HttpCrawler::new("http://127.0.0.1:3001/crawl", Arc::clone(&recovery)));
//! let registry = SourceRegistry::in_memory(vec![SourceDescriptor::new(
//!     "news",
//!     "News",
//!     "https://news.example.com/videos",
//! )]);
//!
//! let chain = build_default_source_chain(crawler, recovery, 1);
//! let pipeline = ContentAggregationPipeline::new(PipelineConfig::default(), chain, registry.subscribe());
//! let snapshot = pipeline.settled().await;
//! println!("{} items", snapshot.items.len());
//! # Ok(())
//! # }
//! ```

mod crawler;
mod error;
mod extract;
mod item;
mod pipeline;
mod source;
mod strategy;

pub use crawler::{CrawledItem, Crawler, HttpCrawler, parse_crawler_response};
pub use error::{FetchError, RegistryError, SourceError};
pub use extract::extract_media_links;
pub use item::{ContentItem, ItemCategory, ItemFlag};
pub use pipeline::{AggregationSnapshot, ContentAggregationPipeline, PassState};
pub use source::{SourceDescriptor, SourceRegistry};
pub use strategy::{
    CrawlerStrategy, DirectExtractionStrategy, SourceChain, SourceOutcome, SourceStrategy,
    build_default_source_chain,
};
