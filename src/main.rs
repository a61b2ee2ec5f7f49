//! CLI entry point for the harvester tool.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::aggregation::{AggregationSnapshot, ItemFlag};
use harvester_core::config::{DEFAULT_CRAWLER_ENDPOINT, HarvesterConfig, load_file_config};
use harvester_core::{
    ContentAggregationPipeline, DownloadQueueManager, FileStore, HttpClient, HttpCrawler,
    JobStatus, KeyValueStore, LocatorPolicy, NetworkRecoveryManager, SourceRegistry,
    build_default_delivery_chain, build_default_source_chain,
};
use tracing::{debug, info, warn};

mod app;
mod cli;

use app::progress_manager::spawn_progress_ui;
use app::source_file::read_source_file;
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Harvester starting");

    let file_config = load_file_config(args.config.as_deref())?;
    file_config.validate()?;
    let mut config = HarvesterConfig::from_file(&file_config);

    // CLI flags win over the config file
    if let Some(concurrency) = args.concurrency {
        config.queue.max_concurrent = usize::from(concurrency);
    }
    if let Some(max_retries) = args.max_retries {
        config.recovery.retry = config
            .recovery
            .retry
            .clone()
            .with_max_retries(u32::from(max_retries));
    }
    if let Some(rate_limit) = args.rate_limit {
        config.queue.rate_limit_delay = Duration::from_millis(rate_limit);
    }

    let state_dir = args
        .state_dir
        .clone()
        .or(file_config.state_dir.clone())
        .unwrap_or_else(|| PathBuf::from(".harvester"));
    let output_dir = args
        .output_dir
        .clone()
        .or(file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let crawler_endpoint = args
        .crawler
        .clone()
        .or(file_config.crawler_endpoint.clone())
        .unwrap_or_else(|| DEFAULT_CRAWLER_ENDPOINT.to_string());

    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::new(&state_dir)
            .with_context(|| format!("Failed to open state directory '{}'", state_dir.display()))?,
    );

    let registry = SourceRegistry::load(Arc::clone(&store))?;
    if let Some(path) = &args.sources {
        let sources = read_source_file(path)?;
        info!(count = sources.len(), path = %path.display(), "Importing sources");
        registry.replace_all(sources)?;
    }

    let enabled = registry.enabled();
    if enabled.is_empty() {
        info!("No enabled sources. Pass a JSON source list with --sources.");
        return Ok(());
    }
    info!(sources = enabled.len(), crawler = %crawler_endpoint, "Aggregating");

    let recovery = Arc::new(NetworkRecoveryManager::new(config.recovery.clone())?);
    let crawler = Arc::new(HttpCrawler::new(crawler_endpoint, Arc::clone(&recovery)));
    let chain = build_default_source_chain(
        crawler,
        Arc::clone(&recovery),
        config.pipeline.placeholders_per_source,
    );
    let pipeline = ContentAggregationPipeline::new(config.pipeline.clone(), chain, registry.subscribe());
    let snapshot = pipeline.settled().await;
    pipeline.shutdown();

    report_snapshot(&snapshot);

    if !args.download {
        return Ok(());
    }

    let policy = LocatorPolicy {
        allow_private_hosts: config.queue.allow_private_hosts,
    };
    let delivery = build_default_delivery_chain(
        HttpClient::with_locator_policy(policy)?,
        Arc::clone(&recovery),
        &output_dir,
        policy,
    );
    let previous = DownloadQueueManager::load_snapshot(store.as_ref())?;
    let queue = Arc::new(DownloadQueueManager::restore(config.queue.clone(), delivery, previous));

    let mut submitted = 0usize;
    for item in &snapshot.items {
        let Some(locator) = item.media_locator.as_deref() else {
            continue;
        };
        match queue.submit(&item.title, item.category.as_str(), locator) {
            Ok(id) => {
                debug!(%id, locator, "Queued item");
                submitted += 1;
            }
            Err(e) => warn!(title = %item.title, error = %e, "Skipped item"),
        }
    }
    let total = queue.list_all().len();
    info!(submitted, total, output_dir = %output_dir.display(), "Downloading");

    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let (progress, stop) = spawn_progress_ui(use_spinner, Arc::clone(&queue), total);

    while !queue.queue_stats().is_idle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let jobs = queue.list_all();
    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
    for job in jobs.iter().filter(|j| j.status == JobStatus::Failed) {
        warn!(
            title = %job.title,
            error = job.last_error.as_deref().unwrap_or("unknown"),
            "Download failed"
        );
    }
    info!(
        completed = count(JobStatus::Completed),
        failed = count(JobStatus::Failed),
        cancelled = count(JobStatus::Cancelled),
        total = jobs.len(),
        "Download complete"
    );

    queue.save_snapshot(store.as_ref())?;
    queue.shutdown();
    Ok(())
}

fn report_snapshot(snapshot: &AggregationSnapshot) {
    if let Some(error) = &snapshot.global_error {
        warn!(error = %error, "Every source failed; no items were refreshed");
        return;
    }
    for failure in &snapshot.source_errors {
        warn!(source = %failure.source_name, error = %failure.message, "Source unavailable");
    }
    for item in &snapshot.items {
        let marker = if item.has_flag(ItemFlag::Placeholder) {
            "placeholder"
        } else if item.has_flag(ItemFlag::EditorPick) {
            "pick"
        } else if item.has_flag(ItemFlag::Latest) {
            "latest"
        } else {
            "-"
        };
        info!(
            id = %item.id,
            category = %item.category,
            flag = marker,
            media = item.media_locator.as_deref().unwrap_or(""),
            "{}",
            item.title
        );
    }
    info!(items = snapshot.items.len(), "Aggregation complete");
}
