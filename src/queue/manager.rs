//! Admission-controlled job queue.
//!
//! One controller task owns drain passes; every drain request (submit, retry,
//! job completion, breaker close) goes through a channel of capacity one, so
//! requests made while a pass runs collapse into a single follow-up pass. Each
//! dispatched job runs on its own task holding a semaphore permit until its
//! result is recorded.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::QueueConfig;
use crate::download::safe_filename;
use crate::persistence::KeyValueStore;

use super::breaker::CircuitBreaker;
use super::error::{DeliveryError, QueueError};
use super::item::{DownloadJob, JobId, JobStatus};
use super::snapshot::QueueSnapshot;
use super::strategy::{Delivery, DeliveryChain, DeliveryContext, DeliveryRequest};
use super::validation::{
    LocatorPolicy, ValidationError, validate_category, validate_locator, validate_title,
};

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting in the FIFO.
    pub queue_length: usize,
    /// Jobs currently `downloading`.
    pub active_count: usize,
    /// Concurrency limit.
    pub max_concurrent: usize,
    /// Whether dispatch is halted by the breaker.
    pub breaker_open: bool,
    /// Failures since the last success or breaker close.
    pub consecutive_failures: u32,
}

impl QueueStats {
    /// No job is waiting or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue_length == 0 && self.active_count == 0
    }
}

struct JobEntry {
    job: DownloadJob,
    seq: u64,
    cancel: Option<CancellationToken>,
}

struct QueueState {
    fifo: VecDeque<JobId>,
    jobs: HashMap<JobId, JobEntry>,
    breaker: CircuitBreaker,
    next_seq: u64,
}

impl QueueState {
    fn active_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Downloading)
            .count()
    }

    fn insert(&mut self, job: DownloadJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.insert(
            job.id,
            JobEntry {
                job,
                seq,
                cancel: None,
            },
        );
    }

    fn ordered_jobs(&self) -> Vec<DownloadJob> {
        let mut entries: Vec<&JobEntry> = self.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    fn evict_where(&mut self, predicate: impl Fn(&DownloadJob) -> bool) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, e| !predicate(&e.job));
        before - self.jobs.len()
    }
}

struct Inner {
    config: QueueConfig,
    policy: LocatorPolicy,
    state: Mutex<QueueState>,
    chain: DeliveryChain,
    permits: Arc<Semaphore>,
    drain_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
}

/// The download queue manager.
///
/// Must be created inside a Tokio runtime: construction spawns the drain
/// controller and the cleanup sweep. Dropping the manager shuts both down and
/// cancels in-flight jobs.
pub struct DownloadQueueManager {
    inner: Arc<Inner>,
}

impl DownloadQueueManager {
    /// Creates an empty queue running jobs through `chain`.
    #[must_use]
    pub fn new(config: QueueConfig, chain: DeliveryChain) -> Self {
        let (drain_tx, drain_rx) = mpsc::channel(1);
        let max_concurrent = config.max_concurrent.max(1);
        let inner = Arc::new(Inner {
            policy: LocatorPolicy {
                allow_private_hosts: config.allow_private_hosts,
            },
            state: Mutex::new(QueueState {
                fifo: VecDeque::new(),
                jobs: HashMap::new(),
                breaker: CircuitBreaker::new(config.failure_threshold, config.breaker_cooldown),
                next_seq: 0,
            }),
            chain,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            drain_tx,
            shutdown: CancellationToken::new(),
            config: QueueConfig {
                max_concurrent,
                ..config
            },
        });

        tokio::spawn(run_controller(Arc::clone(&inner), drain_rx));
        tokio::spawn(run_cleanup(Arc::clone(&inner)));
        Self { inner }
    }

    /// Creates a queue pre-populated from `snapshot`.
    ///
    /// Jobs that were `pending` or `downloading` are re-queued as `pending` in
    /// their original order; terminal jobs are kept as history.
    #[must_use]
    pub fn restore(config: QueueConfig, chain: DeliveryChain, snapshot: QueueSnapshot) -> Self {
        let manager = Self::new(config, chain);
        let mut requeued = 0usize;
        {
            let mut state = manager.inner.lock();
            for mut job in snapshot.jobs {
                if state.jobs.contains_key(&job.id) {
                    continue;
                }
                if let Err(e) = validate_locator(&job.locator, manager.inner.policy) {
                    warn!(job_id = %job.id, error = %e, "dropping restored job with invalid locator");
                    continue;
                }
                if !job.status.is_terminal() {
                    job.reset_for_retry();
                    state.fifo.push_back(job.id);
                    requeued += 1;
                }
                state.insert(job);
            }
        }
        info!(requeued, "queue restored from snapshot");
        manager.inner.request_drain();
        manager
    }

    /// Validates and enqueues a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the title, category or locator is
    /// rejected; no job is created in that case.
    #[instrument(skip(self, title, category, locator), fields(locator = %locator))]
    pub fn submit(&self, title: &str, category: &str, locator: &str) -> Result<JobId, ValidationError> {
        let title = validate_title(title)?;
        let category = validate_category(category)?;
        let url = validate_locator(locator, self.inner.policy).inspect_err(|e| {
            warn!(error = %e, "submission rejected");
        })?;

        let filename = safe_filename(&title, url.as_str());
        let job = DownloadJob::new(title, category, url.as_str(), filename);
        let id = job.id;
        {
            let mut state = self.inner.lock();
            state.insert(job);
            state.fifo.push_back(id);
        }
        info!(job_id = %id, "job submitted");
        self.inner.request_drain();
        Ok(id)
    }

    /// Cancels a pending or downloading job. Returns `false` for unknown or
    /// terminal jobs.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn cancel(&self, id: JobId) -> bool {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(entry) = state.jobs.get_mut(&id) else {
            return false;
        };
        match entry.job.status {
            JobStatus::Pending => {
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(Utc::now());
                state.fifo.retain(|queued| *queued != id);
                info!("pending job cancelled");
                true
            }
            JobStatus::Downloading => {
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(Utc::now());
                if let Some(token) = entry.cancel.take() {
                    token.cancel();
                }
                info!("in-flight job cancelled");
                true
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }

    /// Re-queues a failed job with its original parameters. Returns `false`
    /// unless the job is `failed`.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn retry(&self, id: JobId) -> bool {
        {
            let mut state = self.inner.lock();
            let Some(entry) = state.jobs.get_mut(&id) else {
                return false;
            };
            if entry.job.status != JobStatus::Failed {
                return false;
            }
            entry.job.reset_for_retry();
            state.fifo.push_back(id);
        }
        info!("job re-queued");
        self.inner.request_drain();
        true
    }

    /// Current state of one job.
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<DownloadJob> {
        self.inner.lock().jobs.get(&id).map(|e| e.job.clone())
    }

    /// Every known job, in submission order.
    #[must_use]
    pub fn list_all(&self) -> Vec<DownloadJob> {
        self.inner.lock().ordered_jobs()
    }

    /// Queue counters.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            queue_length: state.fifo.len(),
            active_count: state.active_count(),
            max_concurrent: self.inner.config.max_concurrent,
            breaker_open: state.breaker.is_open(),
            consecutive_failures: state.breaker.consecutive_failures(),
        }
    }

    /// Evicts every terminal job. Returns how many were removed.
    pub fn clear_terminal(&self) -> usize {
        let removed = self.inner.lock().evict_where(|job| job.status.is_terminal());
        debug!(removed, "terminal jobs cleared");
        removed
    }

    /// Evicts terminal jobs older than the configured retention.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired()
    }

    /// Evicts terminal jobs that finished before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.inner.lock().evict_where(|job| job.finished_before(cutoff))
    }

    /// Copies every job, in submission order.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.list_all(),
        }
    }

    /// Persists [`snapshot`](Self::snapshot) to `store`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if encoding or the store write fails.
    pub fn save_snapshot(&self, store: &dyn KeyValueStore) -> Result<(), QueueError> {
        self.snapshot().save(store)
    }

    /// Reads a previously saved snapshot; corrupt data yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Persistence`] when the store itself fails.
    pub fn load_snapshot(store: &dyn KeyValueStore) -> Result<QueueSnapshot, QueueError> {
        QueueSnapshot::load(store)
    }

    /// Stops the controller, timers and sweep, and cancels in-flight jobs.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("queue shutting down");
            self.inner.shutdown.cancel();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Drop for DownloadQueueManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl fmt::Debug for DownloadQueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadQueueManager")
            .field("stats", &self.queue_stats())
            .field("chain", &self.inner.chain)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_drain(&self) {
        match self.drain_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("drain requested after controller stopped");
            }
        }
    }

    fn can_dispatch(&self) -> bool {
        let state = self.lock();
        !state.fifo.is_empty()
            && !state.breaker.is_open()
            && state.active_count() < self.config.max_concurrent
    }

    /// Pops the FIFO head and marks it `downloading`, re-checking the dispatch
    /// conditions under the same lock.
    fn take_next(&self) -> Option<(JobId, DeliveryRequest, CancellationToken)> {
        let mut state = self.lock();
        if state.breaker.is_open() || state.active_count() >= self.config.max_concurrent {
            return None;
        }
        while let Some(id) = state.fifo.pop_front() {
            let Some(entry) = state.jobs.get_mut(&id) else {
                continue;
            };
            if entry.job.status != JobStatus::Pending {
                continue;
            }
            let token = self.shutdown.child_token();
            entry.job.status = JobStatus::Downloading;
            entry.job.progress = 0;
            entry.job.started_at = Some(Utc::now());
            entry.cancel = Some(token.clone());
            let request = DeliveryRequest::new(&entry.job.locator, &entry.job.filename);
            return Some((id, request, token));
        }
        None
    }

    fn set_progress(&self, id: JobId, percent: u8) {
        let mut state = self.lock();
        if let Some(entry) = state.jobs.get_mut(&id) {
            if entry.job.status == JobStatus::Downloading {
                entry.job.progress = percent.min(100);
            }
        }
    }

    /// Records a job's outcome. Returns `true` when this failure tripped the
    /// breaker.
    fn finish_job(&self, id: JobId, result: Result<Delivery, DeliveryError>) -> bool {
        let mut state = self.lock();
        let state = &mut *state;
        let Some(entry) = state.jobs.get_mut(&id) else {
            debug!(job_id = %id, "finished job no longer tracked");
            return false;
        };
        entry.cancel = None;
        if entry.job.status != JobStatus::Downloading {
            debug!(job_id = %id, status = %entry.job.status, "ignoring result of cancelled job");
            return false;
        }

        let job = &mut entry.job;
        job.finished_at = Some(Utc::now());
        match result {
            Ok(delivery) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.last_error = None;
                job.saved_path = Some(delivery.file.path.display().to_string());
                job.delivered_via = Some(delivery.strategy);
                state.breaker.record_success();
                info!(job_id = %id, path = ?job.saved_path, "job completed");
                false
            }
            Err(err) if err.is_cancelled() => {
                job.status = JobStatus::Cancelled;
                info!(job_id = %id, "job cancelled during shutdown");
                false
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.last_error = Some(err.to_string());
                let opened = state.breaker.record_failure();
                warn!(
                    job_id = %id,
                    error = %err,
                    consecutive_failures = state.breaker.consecutive_failures(),
                    "job failed"
                );
                opened
            }
        }
    }

    fn cleanup_expired(&self) -> usize {
        let retention =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };
        let removed = self.lock().evict_where(|job| job.finished_before(cutoff));
        if removed > 0 {
            info!(removed, "expired jobs evicted");
        }
        removed
    }
}

async fn run_controller(inner: Arc<Inner>, mut drain_rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            request = drain_rx.recv() => {
                if request.is_none() {
                    break;
                }
            }
        }
        drain_pass(&inner).await;
    }
    debug!("queue controller stopped");
}

async fn drain_pass(inner: &Arc<Inner>) {
    let mut dispatched = 0usize;
    loop {
        if !inner.can_dispatch() {
            break;
        }
        if dispatched > 0 && !inner.config.rate_limit_delay.is_zero() {
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return,
                () = tokio::time::sleep(inner.config.rate_limit_delay) => {}
            }
        }
        let Ok(permit) = Arc::clone(&inner.permits).try_acquire_owned() else {
            debug!("all permits held, ending drain pass");
            break;
        };
        let Some((id, request, token)) = inner.take_next() else {
            break;
        };
        debug!(job_id = %id, "dispatching job");
        tokio::spawn(run_job(Arc::clone(inner), id, request, token, permit));
        dispatched += 1;
    }
    if dispatched > 0 {
        debug!(dispatched, "drain pass finished");
    }
}

async fn run_job(
    inner: Arc<Inner>,
    id: JobId,
    request: DeliveryRequest,
    token: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let weak: Weak<Inner> = Arc::downgrade(&inner);
    let progress = Arc::new(move |percent: u8| {
        if let Some(inner) = weak.upgrade() {
            inner.set_progress(id, percent);
        }
    });
    let ctx = DeliveryContext::new(token, progress);
    let result = inner.chain.run(&request, &ctx).await;

    if inner.finish_job(id, result) {
        spawn_breaker_timer(&inner);
    }
    drop(permit);
    inner.request_drain();
}

fn spawn_breaker_timer(inner: &Arc<Inner>) {
    let cooldown = inner.lock().breaker.cooldown();
    warn!(cooldown_secs = cooldown.as_secs(), "circuit breaker opened");
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => return,
            () = tokio::time::sleep(cooldown) => {}
        }
        inner.lock().breaker.close();
        info!("circuit breaker closed");
        inner.request_drain();
    });
}

async fn run_cleanup(inner: Arc<Inner>) {
    let period = inner.config.cleanup_interval;
    if period.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            _ = interval.tick() => {
                inner.cleanup_expired();
            }
        }
    }
}
