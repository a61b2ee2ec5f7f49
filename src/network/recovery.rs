//! The network recovery manager: classified retry, alternative locators and
//! availability probing.

use std::time::Duration;

use dashmap::DashSet;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use reqwest::{Client, Method, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::AttemptFailure;
use super::history::{ErrorHistory, NetworkErrorRecord};
use super::locators::alternative_locators;
use super::{NetworkError, RetryDecision, RetryPolicy};
use crate::config::RecoveryConfig;
use crate::download::DEFAULT_USER_AGENT;

/// Largest response body read as text; the rest is discarded.
pub const MAX_TEXT_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Request shape for [`NetworkRecoveryManager::fetch_with_retry`].
///
/// Together with the resource it forms the de-duplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// HTTP method.
    pub method: Method,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl FetchOptions {
    /// Plain `GET`.
    #[must_use]
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Plain `HEAD`, used for existence checks.
    #[must_use]
    pub fn head() -> Self {
        Self {
            method: Method::HEAD,
            ..Self::get()
        }
    }

    /// `POST` with a JSON body.
    #[must_use]
    pub fn post_json(body: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.into()),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn key(&self, resource: &str) -> String {
        let mut key = format!("{} {resource}", self.method);
        for (name, value) in &self.headers {
            key.push_str(&format!("\n{}:{value}", name.to_ascii_lowercase()));
        }
        if let Some(body) = &self.body {
            key.push_str("\n\n");
            key.push_str(body);
        }
        key
    }
}

/// Removes the in-flight key when the fetch finishes, on every path.
struct InFlightGuard<'a> {
    keys: &'a DashSet<String>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

/// Retries network calls with classified backoff and finds working
/// alternatives for unreachable resources.
///
/// Shared as `Arc<NetworkRecoveryManager>` between the download queue and the
/// aggregation pipeline.
#[derive(Debug)]
pub struct NetworkRecoveryManager {
    client: Client,
    config: RecoveryConfig,
    in_flight: DashSet<String>,
    history: ErrorHistory,
}

impl NetworkRecoveryManager {
    /// Creates a manager with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidResource`] if the HTTP client cannot be
    /// built (TLS backend initialization failure).
    pub fn new(config: RecoveryConfig) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(config.redirect_policy.redirect_policy())
            .build()
            .map_err(|e| NetworkError::invalid_resource(format!("http client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    /// Creates a manager around an existing client.
    #[must_use]
    pub fn with_client(client: Client, config: RecoveryConfig) -> Self {
        let history = ErrorHistory::new(config.history_capacity);
        Self {
            client,
            config,
            in_flight: DashSet::new(),
            history,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Fetches `resource`, retrying classified failures per `policy`.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::AlreadyInProgress`] when the identical request is running
    /// - [`NetworkError::Failed`] with the last classification once retries are spent,
    ///   or immediately for `CorsLike`
    /// - [`NetworkError::InvalidResource`] when `resource` is not a URL
    pub async fn fetch_with_retry(
        &self,
        resource: &str,
        options: &FetchOptions,
        policy: &RetryPolicy,
    ) -> Result<Response, NetworkError> {
        self.fetch_with_retry_cancellable(resource, options, policy, &CancellationToken::new())
            .await
    }

    /// Same as [`fetch_with_retry`](Self::fetch_with_retry), aborting at the next
    /// suspension point once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`fetch_with_retry`](Self::fetch_with_retry), plus
    /// [`NetworkError::Cancelled`].
    #[instrument(skip(self, options, policy, cancel), fields(method = %options.method))]
    pub async fn fetch_with_retry_cancellable(
        &self,
        resource: &str,
        options: &FetchOptions,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Response, NetworkError> {
        if url::Url::parse(resource).is_err() {
            return Err(NetworkError::invalid_resource(resource));
        }

        let key = options.key(resource);
        if !self.in_flight.insert(key.clone()) {
            debug!("duplicate in-flight request rejected");
            return Err(NetworkError::already_in_progress(resource));
        }
        let _guard = InFlightGuard {
            keys: &self.in_flight,
            key,
        };

        let mut retries_done = 0u32;
        loop {
            let attempt = tokio::select! {
                () = cancel.cancelled() => return Err(NetworkError::cancelled(resource)),
                result = self.attempt(resource, options) => result,
            };

            let failure = match attempt {
                Ok(response) => {
                    if retries_done > 0 {
                        info!(retries_done, "fetch recovered");
                    }
                    self.history.clear(resource);
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            self.history.record(NetworkErrorRecord::new(
                resource,
                failure.kind,
                failure.message.clone(),
                retries_done,
            ));

            match policy.should_retry(failure.kind, retries_done) {
                RetryDecision::Retry { delay, retry } => {
                    warn!(
                        kind = %failure.kind,
                        error = %failure.message,
                        retry,
                        max_retries = policy.max_retries(),
                        delay_ms = delay.as_millis(),
                        "fetch failed, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(NetworkError::cancelled(resource)),
                        () = tokio::time::sleep(delay) => {}
                    }
                    retries_done = retry;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(kind = %failure.kind, %reason, "giving up");
                    return Err(failure.into_error(resource, retries_done + 1));
                }
            }
        }
    }

    async fn attempt(
        &self,
        resource: &str,
        options: &FetchOptions,
    ) -> Result<Response, AttemptFailure> {
        let mut request = self.client.request(options.method.clone(), resource);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let timeout = self.config.attempt_timeout;
        match tokio::time::timeout(timeout, request.send()).await {
            Err(_) => Err(AttemptFailure::timeout(timeout)),
            Ok(Err(e)) => Err(AttemptFailure::from_reqwest(&e)),
            Ok(Ok(response)) if response.status().is_success() => Ok(response),
            Ok(Ok(response)) => Err(AttemptFailure::from_status(response.status().as_u16())),
        }
    }

    /// Reads `response` as text within the per-attempt timeout, keeping at
    /// most `max_bytes` of the body.
    ///
    /// A slow body fails as [`NetworkErrorKind::Timeout`](super::NetworkErrorKind::Timeout)
    /// instead of stalling the caller.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::Failed`] when the body times out or the stream breaks
    /// - [`NetworkError::Cancelled`] once `cancel` fires
    pub async fn read_text(
        &self,
        resource: &str,
        response: Response,
        max_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<String, NetworkError> {
        let timeout = self.config.attempt_timeout;
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(NetworkError::cancelled(resource)),
            read = tokio::time::timeout(timeout, read_capped(response, max_bytes)) => read,
        };
        match read {
            Ok(Ok(body)) => Ok(String::from_utf8_lossy(&body).into_owned()),
            Ok(Err(e)) => Err(AttemptFailure::from_reqwest(&e).into_error(resource, 1)),
            Err(_) => Err(AttemptFailure::timeout(timeout).into_error(resource, 1)),
        }
    }

    /// Candidate locators to try when `resource` itself is unreachable.
    #[must_use]
    pub fn get_alternative_locators(&self, resource: &str) -> Vec<String> {
        alternative_locators(resource, &self.config.relay_templates)
    }

    /// Probes every candidate concurrently and returns the first that answers
    /// a `HEAD` with a success status within the probe timeout.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn find_best_locator(&self, candidates: &[String]) -> Option<String> {
        let mut probes: FuturesUnordered<_> = candidates
            .iter()
            .map(|candidate| async move {
                self.probe(candidate)
                    .await
                    .then(|| candidate.clone())
            })
            .collect();

        while let Some(result) = probes.next().await {
            if let Some(locator) = result {
                debug!(%locator, "responsive locator found");
                return Some(locator);
            }
        }
        debug!("no candidate responded");
        None
    }

    /// Lightweight existence check: `HEAD` with the probe timeout.
    pub async fn probe(&self, locator: &str) -> bool {
        probe_with(&self.client, locator, self.config.probe_timeout).await
    }

    /// Recent failures recorded against `resource`, oldest first.
    #[must_use]
    pub fn error_history(&self, resource: &str) -> Vec<NetworkErrorRecord> {
        self.history.get(resource)
    }

    /// Number of requests currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

async fn read_capped(response: Response, max_bytes: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let room = max_bytes - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            debug!(max_bytes, "body truncated");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn probe_with(client: &Client, locator: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, client.head(locator).send()).await {
        Ok(Ok(response)) => response.status().is_success(),
        Ok(Err(e)) => {
            debug!(%locator, error = %e, "probe failed");
            false
        }
        Err(_) => {
            debug!(%locator, "probe timed out");
            false
        }
    }
}
