//! Debounced, cancellable fan-out/fan-in aggregation over the enabled sources.
//!
//! Every pass gets a new epoch and a fresh cancellation token; starting a pass
//! cancels the previous one. A pass commits only if its epoch is still the
//! current one when it finishes, so the most recently started pass always
//! wins regardless of completion order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;

use super::error::{FetchError, SourceError};
use super::item::{ContentItem, ItemFlag, flag_latest};
use super::source::SourceDescriptor;
use super::strategy::{SourceChain, SourceOutcome};

/// Outcome of the most recent pass that reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    /// No pass has started.
    Idle,
    /// The current epoch is fetching.
    Running,
    /// The current epoch committed its items.
    Committed,
    /// Every source of the current epoch failed; previous items were kept.
    GloballyFailed,
}

/// Committed aggregation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSnapshot {
    /// Epoch of the most recent pass that reported.
    pub epoch: u64,
    /// Items of the last committed pass.
    pub items: Vec<ContentItem>,
    /// One entry per source whose strategies all failed.
    pub source_errors: Vec<SourceError>,
    /// Set when every source of the last pass failed.
    pub global_error: Option<String>,
    /// State of the most recent pass.
    pub last_pass: PassState,
    /// When items were last replaced.
    pub committed_at: Option<DateTime<Utc>>,
}

impl Default for AggregationSnapshot {
    fn default() -> Self {
        Self {
            epoch: 0,
            items: Vec::new(),
            source_errors: Vec::new(),
            global_error: None,
            last_pass: PassState::Idle,
            committed_at: None,
        }
    }
}

struct PassControl {
    epoch: u64,
    token: Option<CancellationToken>,
    last_sources: Vec<SourceDescriptor>,
}

struct Inner {
    config: PipelineConfig,
    chain: SourceChain,
    control: Mutex<PassControl>,
    snapshot_tx: watch::Sender<AggregationSnapshot>,
    passes_started: AtomicU64,
    shutdown: CancellationToken,
}

/// Recomputes the aggregated item set whenever the source set changes.
///
/// Must be created inside a Tokio runtime. Dropping it cancels the running
/// pass and stops watching the source set.
pub struct ContentAggregationPipeline {
    inner: Arc<Inner>,
}

impl ContentAggregationPipeline {
    /// Starts watching `sources`. The value present at construction counts as
    /// a change and triggers the first pass after the debounce window.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        chain: SourceChain,
        sources: watch::Receiver<Vec<SourceDescriptor>>,
    ) -> Self {
        let (snapshot_tx, _rx) = watch::channel(AggregationSnapshot::default());
        let inner = Arc::new(Inner {
            config,
            chain,
            control: Mutex::new(PassControl {
                epoch: 0,
                token: None,
                last_sources: Vec::new(),
            }),
            snapshot_tx,
            passes_started: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(run_debounce(Arc::clone(&inner), sources));
        Self { inner }
    }

    /// Current committed state.
    #[must_use]
    pub fn snapshot(&self) -> AggregationSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every pass start and commit.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AggregationSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Re-runs the last observed source set immediately. Returns the new epoch.
    pub fn refresh(&self) -> u64 {
        let sources = self.inner.lock().last_sources.clone();
        Inner::start_pass(&self.inner, sources)
    }

    /// Number of passes started so far.
    #[must_use]
    pub fn passes_started(&self) -> u64 {
        self.inner.passes_started.load(Ordering::SeqCst)
    }

    /// Epoch of the most recently started pass.
    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Waits until the most recently started pass has reported and returns
    /// the resulting snapshot.
    pub async fn settled(&self) -> AggregationSnapshot {
        let mut rx = self.subscribe();
        loop {
            let target = self.current_epoch();
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.epoch > 0
                    && snapshot.epoch == target
                    && snapshot.last_pass != PassState::Running
                {
                    return snapshot.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Cancels the running pass and stops watching the source set.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("aggregation pipeline shutting down");
            self.inner.shutdown.cancel();
        }
    }
}

impl Drop for ContentAggregationPipeline {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for ContentAggregationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentAggregationPipeline")
            .field("chain", &self.inner.chain)
            .field("passes_started", &self.passes_started())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PassControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mints an epoch, supersedes the previous pass and spawns the new one.
    fn start_pass(inner: &Arc<Self>, sources: Vec<SourceDescriptor>) -> u64 {
        let (epoch, token) = {
            let mut control = inner.lock();
            control.epoch += 1;
            if let Some(previous) = control.token.take() {
                previous.cancel();
            }
            let token = inner.shutdown.child_token();
            control.token = Some(token.clone());
            control.last_sources.clone_from(&sources);
            let epoch = control.epoch;
            inner.snapshot_tx.send_modify(|snapshot| {
                snapshot.epoch = epoch;
                snapshot.last_pass = PassState::Running;
            });
            (epoch, token)
        };
        inner.passes_started.fetch_add(1, Ordering::SeqCst);
        info!(epoch, sources = sources.len(), "aggregation pass started");
        tokio::spawn(run_pass(Arc::clone(inner), epoch, token, sources));
        epoch
    }

    fn commit(
        &self,
        epoch: u64,
        token: &CancellationToken,
        enabled: &[SourceDescriptor],
        outcomes: Vec<Result<SourceOutcome, FetchError>>,
    ) {
        let control = self.lock();
        if control.epoch != epoch || token.is_cancelled() {
            debug!(epoch, current = control.epoch, "pass superseded, discarding results");
            return;
        }
        let mut outcomes_by_source = Vec::with_capacity(enabled.len());
        for (source, outcome) in enabled.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => outcomes_by_source.push((source, outcome)),
                Err(e) => {
                    debug!(epoch, source = %source.id, error = %e, "pass cancelled mid-flight");
                    return;
                }
            }
        }

        let failed = outcomes_by_source.iter().filter(|(_, o)| !o.succeeded()).count();
        if !enabled.is_empty() && failed == enabled.len() {
            let last = outcomes_by_source
                .last()
                .and_then(|(_, o)| o.error.clone())
                .unwrap_or_default();
            let message = format!("all {failed} sources failed; last error: {last}");
            warn!(epoch, "{message}");
            self.snapshot_tx.send_modify(|snapshot| {
                snapshot.epoch = epoch;
                snapshot.source_errors.clear();
                snapshot.global_error = Some(message);
                snapshot.last_pass = PassState::GloballyFailed;
            });
            return;
        }

        let mut items = Vec::new();
        let mut source_errors = Vec::new();
        for (index, (source, outcome)) in outcomes_by_source.into_iter().enumerate() {
            let SourceOutcome {
                items: mut source_items,
                error,
            } = outcome;
            match error {
                Some(message) => source_errors.push(SourceError {
                    source_id: source.id.clone(),
                    source_name: source.name.clone(),
                    message,
                }),
                None => {
                    flag_latest(&mut source_items, self.config.latest_per_source);
                    if index == 0 {
                        if let Some(first) = source_items.first_mut() {
                            first.add_flag(ItemFlag::EditorPick);
                        }
                    }
                }
            }
            items.extend(source_items);
        }

        info!(
            epoch,
            items = items.len(),
            failed_sources = source_errors.len(),
            "aggregation pass committed"
        );
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.epoch = epoch;
            snapshot.items = items;
            snapshot.source_errors = source_errors;
            snapshot.global_error = None;
            snapshot.last_pass = PassState::Committed;
            snapshot.committed_at = Some(Utc::now());
        });
        drop(control);
    }
}

#[instrument(skip(inner, token, sources))]
async fn run_pass(
    inner: Arc<Inner>,
    epoch: u64,
    token: CancellationToken,
    sources: Vec<SourceDescriptor>,
) {
    let enabled: Vec<SourceDescriptor> = sources.into_iter().filter(|s| s.enabled).collect();
    let outcomes: Vec<Result<SourceOutcome, FetchError>> =
        join_all(enabled.iter().map(|source| inner.chain.run(source, &token))).await;
    inner.commit(epoch, &token, &enabled, outcomes);
}

async fn run_debounce(inner: Arc<Inner>, mut sources: watch::Receiver<Vec<SourceDescriptor>>) {
    sources.mark_changed();
    let quiet = inner.config.debounce;
    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            changed = sources.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        // Each further change restarts the quiet window.
        loop {
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return,
                changed = sources.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(quiet) => break,
            }
        }

        let latest = sources.borrow_and_update().clone();
        Inner::start_pass(&inner, latest);
    }
    debug!("source watcher stopped");
}
