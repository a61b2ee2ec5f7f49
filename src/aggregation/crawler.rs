//! Client for the external crawling service.
//!
//! The service takes `{"url": "<endpoint>"}` and answers with either a JSON
//! array of `{title, image, description, videoUrl}` records or an
//! `{"error": "..."}` object. Any other body is treated as a failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::network::{FetchOptions, MAX_TEXT_BODY_BYTES, NetworkRecoveryManager};

use super::error::FetchError;

/// One record returned by the crawling service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawledItem {
    /// Item title.
    #[serde(default)]
    pub title: Option<String>,
    /// Thumbnail locator.
    #[serde(default)]
    pub image: Option<String>,
    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
    /// Media locator.
    #[serde(default, rename = "videoUrl")]
    pub video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrawlerResponse {
    Items(Vec<CrawledItem>),
    Error { error: String },
}

/// Something that turns a source endpoint into crawled records.
///
/// Uses `async_trait` so the pipeline can hold an `Arc<dyn Crawler>`.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Crawls `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, a service error object, an
    /// unexpected body shape, or cancellation.
    async fn crawl(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrawledItem>, FetchError>;
}

/// [`Crawler`] backed by the HTTP crawling service.
#[derive(Debug, Clone)]
pub struct HttpCrawler {
    service_url: String,
    recovery: Arc<NetworkRecoveryManager>,
}

impl HttpCrawler {
    /// Creates a client for the service at `service_url`.
    pub fn new(service_url: impl Into<String>, recovery: Arc<NetworkRecoveryManager>) -> Self {
        Self {
            service_url: service_url.into(),
            recovery,
        }
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    #[instrument(skip(self, cancel), fields(service = %self.service_url))]
    async fn crawl(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrawledItem>, FetchError> {
        let body = serde_json::json!({ "url": endpoint }).to_string();
        let policy = self.recovery.config().retry.clone();
        let response = self
            .recovery
            .fetch_with_retry_cancellable(
                &self.service_url,
                &FetchOptions::post_json(body),
                &policy,
                cancel,
            )
            .await?;

        let text = self
            .recovery
            .read_text(&self.service_url, response, MAX_TEXT_BODY_BYTES, cancel)
            .await?;

        let items = parse_crawler_response(&text)?;
        debug!(count = items.len(), "crawler returned items");
        Ok(items)
    }
}

/// Decodes a crawling-service body.
///
/// # Errors
///
/// Returns [`FetchError::Crawler`] for `{error}` objects and any shape other
/// than an array of records.
pub fn parse_crawler_response(body: &str) -> Result<Vec<CrawledItem>, FetchError> {
    match serde_json::from_str::<CrawlerResponse>(body) {
        Ok(CrawlerResponse::Items(items)) => Ok(items),
        Ok(CrawlerResponse::Error { error }) => Err(FetchError::crawler(error)),
        Err(e) => Err(FetchError::crawler(format!("unexpected response shape: {e}"))),
    }
}
