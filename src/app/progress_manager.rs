//! Progress UI (spinner) for download runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use harvester_core::{DownloadQueueManager, JobStatus};
use indicatif::{ProgressBar, ProgressStyle};

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    queue: Arc<DownloadQueueManager>,
    total: usize,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(queue, total, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    queue: Arc<DownloadQueueManager>,
    total: usize,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            spinner.set_message(progress_message(&queue, total));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

fn progress_message(queue: &DownloadQueueManager, total: usize) -> String {
    let jobs = queue.list_all();
    let done = jobs.iter().filter(|j| j.status.is_terminal()).count();
    let current = jobs
        .iter()
        .find(|j| j.status == JobStatus::Downloading)
        .map_or_else(
            || "queue".to_string(),
            |j| format!("{} ({}%)", j.title, j.progress),
        );
    let stats = queue.queue_stats();
    let paused = if stats.breaker_open { " [paused]" } else { "" };
    format!("[{}/{}] Downloading {current}...{paused}", done.min(total), total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::spawn_progress_ui;
    use harvester_core::{DeliveryChain, DownloadQueueManager, QueueConfig};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn queue() -> Arc<DownloadQueueManager> {
        Arc::new(DownloadQueueManager::new(
            QueueConfig::default(),
            DeliveryChain::new(),
        ))
    }

    #[tokio::test]
    async fn spawn_progress_ui_when_disabled_returns_none_handle_and_stop_already_true() {
        let (handle, stop) = spawn_progress_ui(false, queue(), 1);

        assert!(handle.is_none());
        assert!(
            stop.load(Ordering::SeqCst),
            "stop signal should be true when spinner disabled"
        );
    }

    #[tokio::test]
    async fn spawn_progress_ui_when_enabled_returns_handle_and_stop_ends_task() {
        let (handle, stop) = spawn_progress_ui(true, queue(), 1);

        assert!(handle.is_some());
        assert!(!stop.load(Ordering::SeqCst));

        stop.store(true, Ordering::SeqCst);
        handle.unwrap().await.unwrap();
    }
}
