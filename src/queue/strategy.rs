//! Ordered delivery strategies tried for every job.
//!
//! The default chain is:
//! 1. [`DirectDelivery`] - stream the validated locator to disk
//! 2. [`RecoveryAssistedDelivery`] - probe with classified retry, then deliver
//! 3. [`AlternativeLocatorDelivery`] - probe alternative locators, deliver the
//!    first that answers
//!
//! A strategy reports cancellation as [`DeliveryError::Cancelled`] (or a wrapped
//! download/network cancellation); the chain stops at the first such error
//! instead of falling through.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::{DeliveredFile, HttpClient};
use crate::network::{FetchOptions, NetworkRecoveryManager};

use super::error::DeliveryError;
use super::validation::{LocatorPolicy, validate_locator};

/// What to deliver and under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Validated source locator.
    pub locator: String,
    /// Target filename inside the output directory.
    pub filename: String,
}

impl DeliveryRequest {
    /// Creates a request.
    pub fn new(locator: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            filename: filename.into(),
        }
    }
}

/// Per-job context handed to every strategy.
#[derive(Clone)]
pub struct DeliveryContext {
    cancel: CancellationToken,
    progress: Arc<dyn Fn(u8) + Send + Sync>,
}

impl DeliveryContext {
    /// Creates a context with a progress sink.
    pub fn new(cancel: CancellationToken, progress: Arc<dyn Fn(u8) + Send + Sync>) -> Self {
        Self { cancel, progress }
    }

    /// Context that discards progress.
    #[must_use]
    pub fn detached(cancel: CancellationToken) -> Self {
        Self::new(cancel, Arc::new(|_| {}))
    }

    /// The job's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reports a completion percentage.
    pub fn report_progress(&self, percent: u8) {
        (self.progress)(percent.min(100));
    }
}

impl fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A successful delivery and the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The written file.
    pub file: DeliveredFile,
    /// Name of the strategy that succeeded.
    pub strategy: String,
}

/// One way of getting a job's bytes onto disk.
///
/// Uses `async_trait` so strategies can be stored as `Box<dyn DeliveryStrategy>`.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Short name used in logs and job records.
    fn name(&self) -> &str;

    /// Attempts the delivery.
    async fn deliver(
        &self,
        request: &DeliveryRequest,
        ctx: &DeliveryContext,
    ) -> Result<DeliveredFile, DeliveryError>;
}

/// Streams the locator straight to disk.
#[derive(Debug, Clone)]
pub struct DirectDelivery {
    client: HttpClient,
    output_dir: PathBuf,
}

impl DirectDelivery {
    /// Creates the strategy writing into `output_dir`.
    pub fn new(client: HttpClient, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
        }
    }

    async fn deliver_from(
        &self,
        locator: &str,
        filename: &str,
        ctx: &DeliveryContext,
    ) -> Result<DeliveredFile, DeliveryError> {
        let progress = |percent: u8| ctx.report_progress(percent);
        let file = self
            .client
            .deliver(locator, &self.output_dir, filename, &progress, ctx.cancel_token())
            .await?;
        Ok(file)
    }
}

#[async_trait]
impl DeliveryStrategy for DirectDelivery {
    fn name(&self) -> &str {
        "direct"
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        ctx: &DeliveryContext,
    ) -> Result<DeliveredFile, DeliveryError> {
        self.deliver_from(&request.locator, &request.filename, ctx)
            .await
    }
}

/// Confirms the locator through the recovery layer's retrying `HEAD`, then
/// delivers directly.
#[derive(Debug, Clone)]
pub struct RecoveryAssistedDelivery {
    recovery: Arc<NetworkRecoveryManager>,
    direct: DirectDelivery,
}

impl RecoveryAssistedDelivery {
    /// Creates the strategy.
    pub fn new(recovery: Arc<NetworkRecoveryManager>, direct: DirectDelivery) -> Self {
        Self { recovery, direct }
    }
}

#[async_trait]
impl DeliveryStrategy for RecoveryAssistedDelivery {
    fn name(&self) -> &str {
        "recovery_assisted"
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        ctx: &DeliveryContext,
    ) -> Result<DeliveredFile, DeliveryError> {
        let policy = self.recovery.config().retry.clone();
        self.recovery
            .fetch_with_retry_cancellable(
                &request.locator,
                &FetchOptions::head(),
                &policy,
                ctx.cancel_token(),
            )
            .await?;
        debug!(locator = %request.locator, "probe recovered, retrying delivery");
        self.direct
            .deliver_from(&request.locator, &request.filename, ctx)
            .await
    }
}

/// Probes alternative locators and delivers from the first that answers.
#[derive(Debug, Clone)]
pub struct AlternativeLocatorDelivery {
    recovery: Arc<NetworkRecoveryManager>,
    direct: DirectDelivery,
    policy: LocatorPolicy,
}

impl AlternativeLocatorDelivery {
    /// Creates the strategy. Candidates must pass `policy` before they are probed.
    pub fn new(
        recovery: Arc<NetworkRecoveryManager>,
        direct: DirectDelivery,
        policy: LocatorPolicy,
    ) -> Self {
        Self {
            recovery,
            direct,
            policy,
        }
    }
}

#[async_trait]
impl DeliveryStrategy for AlternativeLocatorDelivery {
    fn name(&self) -> &str {
        "alternative_locator"
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        ctx: &DeliveryContext,
    ) -> Result<DeliveredFile, DeliveryError> {
        let candidates: Vec<String> = self
            .recovery
            .get_alternative_locators(&request.locator)
            .into_iter()
            .filter(|candidate| validate_locator(candidate, self.policy).is_ok())
            .collect();

        let best = tokio::select! {
            biased;
            () = ctx.cancel_token().cancelled() => {
                return Err(DeliveryError::cancelled(&request.locator));
            }
            best = self.recovery.find_best_locator(&candidates) => best,
        };

        let Some(locator) = best else {
            return Err(DeliveryError::NoAlternative {
                locator: request.locator.clone(),
                candidates: candidates.len(),
            });
        };
        info!(original = %request.locator, alternative = %locator, "delivering from alternative");
        self.direct
            .deliver_from(&locator, &request.filename, ctx)
            .await
    }
}

/// Ordered fallback chain of delivery strategies.
#[derive(Default)]
pub struct DeliveryChain {
    strategies: Vec<Box<dyn DeliveryStrategy>>,
}

impl DeliveryChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a strategy; strategies run in registration order.
    pub fn register(&mut self, strategy: Box<dyn DeliveryStrategy>) {
        debug!(name = strategy.name(), "registering delivery strategy");
        self.strategies.push(strategy);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, strategy: impl DeliveryStrategy + 'static) -> Self {
        self.register(Box::new(strategy));
        self
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Runs the strategies in order until one succeeds.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Cancelled`] once the context is cancelled, without
    ///   trying further strategies
    /// - [`DeliveryError::Exhausted`] carrying the last strategy's error
    /// - [`DeliveryError::NoStrategies`] for an empty chain
    #[tracing::instrument(skip(self, request, ctx), fields(locator = %request.locator))]
    pub async fn run(
        &self,
        request: &DeliveryRequest,
        ctx: &DeliveryContext,
    ) -> Result<Delivery, DeliveryError> {
        let mut last = None;
        let mut attempted = 0usize;

        for strategy in &self.strategies {
            if ctx.is_cancelled() {
                return Err(DeliveryError::cancelled(&request.locator));
            }
            attempted += 1;
            debug!(strategy = strategy.name(), "trying delivery strategy");

            match strategy.deliver(request, ctx).await {
                Ok(file) => {
                    info!(strategy = strategy.name(), path = %file.path.display(), "delivered");
                    return Ok(Delivery {
                        file,
                        strategy: strategy.name().to_string(),
                    });
                }
                Err(err) if err.is_cancelled() || ctx.is_cancelled() => {
                    debug!(strategy = strategy.name(), "delivery cancelled");
                    return Err(DeliveryError::cancelled(&request.locator));
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), error = %err, "delivery strategy failed");
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => Err(DeliveryError::Exhausted {
                attempted,
                last: Box::new(last),
            }),
            None => Err(DeliveryError::NoStrategies),
        }
    }
}

impl fmt::Debug for DeliveryChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("DeliveryChain")
            .field("strategies", &names)
            .finish()
    }
}

/// Builds the direct → recovery-assisted → alternative-locator chain.
#[must_use]
pub fn build_default_delivery_chain(
    client: HttpClient,
    recovery: Arc<NetworkRecoveryManager>,
    output_dir: impl Into<PathBuf>,
    policy: LocatorPolicy,
) -> DeliveryChain {
    let direct = DirectDelivery::new(client, output_dir);
    DeliveryChain::new()
        .with(direct.clone())
        .with(RecoveryAssistedDelivery::new(
            Arc::clone(&recovery),
            direct.clone(),
        ))
        .with(AlternativeLocatorDelivery::new(recovery, direct, policy))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::download::DownloadError;

    struct Scripted {
        name: &'static str,
        outcome: fn(&DeliveryRequest) -> Result<DeliveredFile, DeliveryError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeliveryStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(
            &self,
            request: &DeliveryRequest,
            _ctx: &DeliveryContext,
        ) -> Result<DeliveredFile, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(request)
        }
    }

    fn ok(request: &DeliveryRequest) -> Result<DeliveredFile, DeliveryError> {
        Ok(DeliveredFile {
            path: PathBuf::from(&request.filename),
            bytes: 1,
            locator: request.locator.clone(),
        })
    }

    fn status_500(request: &DeliveryRequest) -> Result<DeliveredFile, DeliveryError> {
        Err(DownloadError::http_status(&request.locator, 500).into())
    }

    fn cancelled(request: &DeliveryRequest) -> Result<DeliveredFile, DeliveryError> {
        Err(DownloadError::cancelled(&request.locator).into())
    }

    fn scripted(
        name: &'static str,
        outcome: fn(&DeliveryRequest) -> Result<DeliveredFile, DeliveryError>,
    ) -> (Scripted, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Scripted {
                name,
                outcome,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest::new("https://a.test/v.mp4", "v.mp4")
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_first_success() {
        let (first, first_calls) = scripted("first", status_500);
        let (second, second_calls) = scripted("second", ok);
        let (third, third_calls) = scripted("third", ok);
        let chain = DeliveryChain::new().with(first).with(second).with(third);

        let ctx = DeliveryContext::detached(CancellationToken::new());
        let delivery = chain.run(&request(), &ctx).await.unwrap();

        assert_eq!(delivery.strategy, "second");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_exhausted_carries_last_error() {
        let (a, _) = scripted("a", status_500);
        let (b, _) = scripted("b", status_500);
        let chain = DeliveryChain::new().with(a).with(b);

        let ctx = DeliveryContext::detached(CancellationToken::new());
        let err = chain.run(&request(), &ctx).await.unwrap_err();
        match err {
            DeliveryError::Exhausted { attempted, last } => {
                assert_eq!(attempted, 2);
                assert!(matches!(
                    *last,
                    DeliveryError::Download(DownloadError::HttpStatus { status: 500, .. })
                ));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chain_stops_on_cancellation() {
        let (a, _) = scripted("a", cancelled);
        let (b, b_calls) = scripted("b", ok);
        let chain = DeliveryChain::new().with(a).with(b);

        let ctx = DeliveryContext::detached(CancellationToken::new());
        let err = chain.run(&request(), &ctx).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Cancelled { .. }));
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_checks_token_before_each_strategy() {
        let (a, a_calls) = scripted("a", ok);
        let chain = DeliveryChain::new().with(a);
        let token = CancellationToken::new();
        token.cancel();

        let err = chain
            .run(&request(), &DeliveryContext::detached(token))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = DeliveryChain::new();
        let ctx = DeliveryContext::detached(CancellationToken::new());
        assert!(matches!(
            chain.run(&request(), &ctx).await,
            Err(DeliveryError::NoStrategies)
        ));
    }

    #[test]
    fn test_default_chain_order() {
        let recovery = Arc::new(
            NetworkRecoveryManager::new(crate::config::RecoveryConfig::default()).unwrap(),
        );
        let chain = build_default_delivery_chain(
            HttpClient::new().unwrap(),
            recovery,
            "/tmp/out",
            LocatorPolicy::strict(),
        );
        assert_eq!(chain.len(), 3);
        let debug = format!("{chain:?}");
        assert!(debug.contains("[\"direct\", \"recovery_assisted\", \"alternative_locator\"]"));
    }

    #[test]
    fn test_context_clamps_progress() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let ctx = DeliveryContext::new(
            CancellationToken::new(),
            Arc::new(move |p| sink.store(usize::from(p), Ordering::SeqCst)),
        );
        ctx.report_progress(250);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
