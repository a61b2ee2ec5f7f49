//! Per-source fetch chain: crawler, then direct extraction, then placeholders.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::network::{FetchOptions, MAX_TEXT_BODY_BYTES, NetworkError, NetworkRecoveryManager};

use super::crawler::Crawler;
use super::error::FetchError;
use super::extract::extract_media_links;
use super::item::ContentItem;
use super::source::SourceDescriptor;

/// Most links kept from one directly fetched page.
const MAX_EXTRACTED_LINKS: usize = 50;

/// One way of turning a source into items.
///
/// Returning an empty list is a failure; the chain falls through on it.
#[async_trait]
pub trait SourceStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetches items for `source`.
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentItem>, FetchError>;
}

/// Asks the crawling service.
pub struct CrawlerStrategy {
    crawler: Arc<dyn Crawler>,
}

impl CrawlerStrategy {
    /// Wraps a crawler.
    pub fn new(crawler: Arc<dyn Crawler>) -> Self {
        Self { crawler }
    }
}

#[async_trait]
impl SourceStrategy for CrawlerStrategy {
    fn name(&self) -> &str {
        "crawler"
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let crawled = self.crawler.crawl(&source.endpoint, cancel).await?;
        Ok(crawled
            .into_iter()
            .enumerate()
            .map(|(ordinal, item)| ContentItem::from_crawled(source, ordinal, item))
            .collect())
    }
}

/// Fetches the endpoint itself and pattern-matches media links.
pub struct DirectExtractionStrategy {
    recovery: Arc<NetworkRecoveryManager>,
}

impl DirectExtractionStrategy {
    /// Creates the strategy.
    pub fn new(recovery: Arc<NetworkRecoveryManager>) -> Self {
        Self { recovery }
    }
}

#[async_trait]
impl SourceStrategy for DirectExtractionStrategy {
    fn name(&self) -> &str {
        "direct_extraction"
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let base = Url::parse(&source.endpoint)
            .map_err(|_| NetworkError::invalid_resource(&source.endpoint))?;
        let policy = self.recovery.config().retry.clone();
        let response = self
            .recovery
            .fetch_with_retry_cancellable(&source.endpoint, &FetchOptions::get(), &policy, cancel)
            .await?;
        let body = self
            .recovery
            .read_text(&source.endpoint, response, MAX_TEXT_BODY_BYTES, cancel)
            .await?;

        Ok(extract_media_links(&body, &base, MAX_EXTRACTED_LINKS)
            .into_iter()
            .enumerate()
            .map(|(ordinal, link)| ContentItem::from_media_link(source, ordinal, link))
            .collect())
    }
}

/// Items produced for one source, plus the error when every real strategy
/// failed and placeholders were substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    /// Items to commit for this source.
    pub items: Vec<ContentItem>,
    /// Set when the items are placeholders.
    pub error: Option<String>,
}

impl SourceOutcome {
    /// Whether a real strategy produced the items.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered strategies run for each source. Placeholders are the final,
/// infallible fallback.
pub struct SourceChain {
    strategies: Vec<Box<dyn SourceStrategy>>,
    placeholders: usize,
}

impl SourceChain {
    /// Creates an empty chain producing `placeholders` stand-ins on failure.
    #[must_use]
    pub fn new(placeholders: usize) -> Self {
        Self {
            strategies: Vec::new(),
            placeholders: placeholders.max(1),
        }
    }

    /// Appends a strategy.
    #[must_use]
    pub fn with(mut self, strategy: impl SourceStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Runs the chain for `source`.
    ///
    /// Returns `Err(FetchError::Cancelled)` only when `cancel` fires; every
    /// other failure becomes placeholder items.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] when the pass is cancelled.
    #[tracing::instrument(skip(self, source, cancel), fields(source = %source.id))]
    pub async fn run(
        &self,
        source: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome, FetchError> {
        let mut last_error = String::from("no fetch strategies configured");

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match strategy.fetch(source, cancel).await {
                Ok(items) if !items.is_empty() => {
                    debug!(strategy = strategy.name(), count = items.len(), "source fetched");
                    return Ok(SourceOutcome { items, error: None });
                }
                Ok(_) => {
                    debug!(strategy = strategy.name(), "strategy returned no items");
                    last_error = FetchError::empty(&source.endpoint).to_string();
                }
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    return Err(FetchError::Cancelled);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "source strategy failed");
                    last_error = e.to_string();
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let items = (0..self.placeholders)
            .map(|ordinal| ContentItem::placeholder(source, ordinal, &last_error))
            .collect();
        Ok(SourceOutcome {
            items,
            error: Some(last_error),
        })
    }
}

impl fmt::Debug for SourceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("SourceChain")
            .field("strategies", &names)
            .field("placeholders", &self.placeholders)
            .finish()
    }
}

/// Builds the crawler → direct extraction chain.
#[must_use]
pub fn build_default_source_chain(
    crawler: Arc<dyn Crawler>,
    recovery: Arc<NetworkRecoveryManager>,
    placeholders: usize,
) -> SourceChain {
    SourceChain::new(placeholders)
        .with(CrawlerStrategy::new(crawler))
        .with(DirectExtractionStrategy::new(recovery))
}
