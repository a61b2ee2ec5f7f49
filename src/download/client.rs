//! HTTP client wrapper for streaming deliveries to disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_USER_AGENT, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::filename::{partial_path_for, resolve_unique_path};
use crate::queue::LocatorPolicy;

/// Attempts at claiming a `.part` name before giving up.
const RESERVE_ATTEMPTS: usize = 16;

/// Result of a completed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFile {
    /// Final path on disk.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// Locator the bytes actually came from.
    pub locator: String,
}

/// Streaming HTTP client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default timeouts that refuses redirects onto
    /// blocked hosts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the TLS backend fails to initialize.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_locator_policy(LocatorPolicy::strict())
    }

    /// Creates a client with the default timeouts whose redirects are checked
    /// against `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the TLS backend fails to initialize.
    pub fn with_locator_policy(policy: LocatorPolicy) -> Result<Self, DownloadError> {
        Self::with_options(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
            policy,
        )
    }

    /// Creates a client with explicit connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the TLS backend fails to initialize.
    pub fn with_options(
        connect: Duration,
        read: Duration,
        policy: LocatorPolicy,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(connect)
            .read_timeout(read)
            .redirect(policy.redirect_policy())
            .gzip(true)
            .build()
            .map_err(|e| DownloadError::invalid_url(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Returns the underlying reqwest client for sharing the pool.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Streams `url` into `output_dir/filename`.
    ///
    /// The body is written to an exclusively created `.part` file and renamed
    /// once complete, so a cancelled or failed transfer never leaves a file
    /// under the final name and concurrent deliveries of the same name never
    /// share a partial file. `on_progress` receives the completion percentage
    /// whenever it changes, only when the server sends `Content-Length`.
    /// `cancel` is checked between body chunks.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for request, status, IO or cancellation failures.
    #[instrument(skip(self, on_progress, cancel), fields(url = %url))]
    pub async fn deliver(
        &self,
        url: &str,
        output_dir: &Path,
        filename: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<DeliveredFile, DownloadError> {
        if url::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            result = self.client.get(url).send() => result.map_err(|e| map_reqwest_error(url, e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DownloadError::io(output_dir, e))?;
        let (final_path, partial_path, file) = reserve_partial(output_dir, filename).await?;

        let outcome = match write_body(url, response, file, &partial_path, on_progress, cancel).await {
            Ok(written) => commit_partial(&partial_path, final_path, output_dir, filename)
                .await
                .map(|path| (path, written)),
            Err(e) => Err(e),
        };
        let (path, written) = discard_partial_on_error(&partial_path, outcome).await?;

        info!(path = %path.display(), bytes = written, "delivery complete");
        Ok(DeliveredFile {
            path,
            bytes: written,
            locator: url.to_string(),
        })
    }
}

/// Streams the response body into `file`, returning the bytes written.
async fn write_body(
    url: &str,
    response: Response,
    file: File,
    partial_path: &Path,
    on_progress: &(dyn Fn(u8) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let content_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|len| *len > 0);

    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let mut last_percent: Option<u8> = None;

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            next = stream.next() => next,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(partial_path, e))?;
        written += chunk.len() as u64;

        if let Some(total) = content_length {
            let percent = percent_of(written, total);
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                on_progress(percent);
            }
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(partial_path, e))?;
    Ok(written)
}

/// Claims a free final name by creating its `.part` file exclusively.
async fn reserve_partial(
    output_dir: &Path,
    filename: &str,
) -> Result<(PathBuf, PathBuf, File), DownloadError> {
    for _ in 0..RESERVE_ATTEMPTS {
        let final_path = resolve_unique_path(output_dir, filename);
        let partial_path = partial_path_for(&final_path);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .await
        {
            Ok(file) => return Ok((final_path, partial_path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %partial_path.display(), "partial name taken, trying the next one");
            }
            Err(e) => return Err(DownloadError::io(&partial_path, e)),
        }
    }
    Err(DownloadError::io(
        output_dir,
        io::Error::new(io::ErrorKind::AlreadyExists, format!("no free name for '{filename}'")),
    ))
}

/// Moves the finished `.part` into place. A file that appeared under the
/// reserved name meanwhile is never replaced; the next free name is used.
async fn commit_partial(
    partial_path: &Path,
    final_path: PathBuf,
    output_dir: &Path,
    filename: &str,
) -> Result<PathBuf, DownloadError> {
    let target = if fs::try_exists(&final_path).await.unwrap_or(true) {
        let target = resolve_unique_path(output_dir, filename);
        debug!(taken = %final_path.display(), target = %target.display(), "final name taken");
        target
    } else {
        final_path
    };
    fs::rename(partial_path, &target)
        .await
        .map_err(|e| DownloadError::io(&target, e))?;
    Ok(target)
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else if let Some(status) = error.status() {
        DownloadError::http_status(url, status.as_u16())
    } else {
        DownloadError::network(url, error)
    }
}

/// Removes the `.part` file when `outcome` is an error.
async fn discard_partial_on_error<T>(
    partial_path: &Path,
    outcome: Result<T, DownloadError>,
) -> Result<T, DownloadError> {
    if outcome.is_err() {
        remove_partial(partial_path).await;
    }
    outcome
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "could not remove partial file");
    }
}

#[allow(clippy::cast_possible_truncation)]
fn percent_of(written: u64, total: u64) -> u8 {
    (written.saturating_mul(100) / total).min(100) as u8
}
