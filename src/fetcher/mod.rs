//! Parallel ranged download engine
//!
//! The [`ParallelFetcher`] runs the full fork-join transfer of one resource:
//!
//! 1. **Probe** the URL with `HEAD` for its length and display name
//! 2. **Prepare** a destination region of exactly that length
//! 3. **Dispatch** one worker per byte range; each streams its slice and
//!    writes it at the slice's absolute offset
//! 4. **Join** all workers and report the first failure in dispatch order
//!
//! The first failing worker cancels its siblings. A transfer that fails
//! leaves the destination in an undefined state and must be discarded.

mod partition;
mod range;

pub use partition::partition;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, build_client};
use crate::error::{AllocationError, Error, RangeFetchError, Result};
use crate::probe::probe;
use crate::region::{DestinationRegion, FileRegion, prepare_file};
use crate::types::{ProgressSink, TransferTarget};

use range::RangeJob;

/// Fetches one resource at a time with a fixed number of concurrent range workers
#[derive(Clone, Debug)]
pub struct ParallelFetcher {
    client: reqwest::Client,
    config: Arc<Config>,
    headers: HeaderMap,
}

impl ParallelFetcher {
    /// Create a fetcher with a client built from `config`
    ///
    /// Fails with [`Error::Config`] before any network activity if the
    /// configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config)?;
        Self::with_client(client, config)
    }

    /// Create a fetcher around a caller-supplied HTTP client
    ///
    /// The client carries whatever auth, redirect and retry policy the host
    /// application wants applied to every request.
    pub fn with_client(client: reqwest::Client, config: Config) -> Result<Self> {
        config.validate()?;
        let headers = config.header_map()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            headers,
        })
    }

    /// The configuration this fetcher was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The HTTP client used for every request
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Probe `url` for its length and display name
    pub async fn probe(&self, url: &str) -> Result<TransferTarget> {
        probe(&self.client, url, &self.config).await
    }

    /// Probe `url`, pre-size `destination`, and fill it in parallel
    ///
    /// On failure the partially written file is removed.
    pub async fn download_to_path(
        &self,
        url: &str,
        destination: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TransferTarget> {
        let target = self.probe(url).await?;
        self.download_target(&target, destination, progress, CancellationToken::new())
            .await?;
        Ok(target)
    }

    /// Pre-size `destination` for an already probed target and fill it in parallel
    ///
    /// On failure (including cancellation) the partially written file is removed.
    pub async fn download_target(
        &self,
        target: &TransferTarget,
        destination: &Path,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let region = self.prepare(destination, target.total_length).await?;
        let region = Arc::new(region);

        let outcome = async {
            self.fetch_into_with_cancel(target, region.clone(), progress, cancel)
                .await?;
            region.flush().await?;
            Ok::<_, Error>(())
        }
        .await;

        if outcome.is_err() {
            drop(region);
            if let Err(e) = tokio::fs::remove_file(destination).await {
                tracing::warn!(
                    path = %destination.display(),
                    error = %e,
                    "could not remove incomplete destination"
                );
            }
        }
        outcome
    }

    async fn prepare(&self, destination: &Path, len: u64) -> Result<FileRegion> {
        let path = destination.to_path_buf();
        let check_disk_space = self.config.check_disk_space;
        tokio::task::spawn_blocking(move || prepare_file(&path, len, check_disk_space))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("prepare task panicked: {}", e))))?
            .map_err(Error::from)
    }

    /// Fill `region` with the bytes of `target` using `parallelism` workers
    pub async fn fetch_into(
        &self,
        target: &TransferTarget,
        region: Arc<dyn DestinationRegion>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        self.fetch_into_with_cancel(target, region, progress, CancellationToken::new())
            .await
    }

    /// Like [`fetch_into`](Self::fetch_into), stopping early when `cancel` fires
    ///
    /// Returns [`Error::Cancelled`] if the caller cancelled and no worker had
    /// failed on its own.
    pub async fn fetch_into_with_cancel(
        &self,
        target: &TransferTarget,
        region: Arc<dyn DestinationRegion>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if region.len() != target.total_length {
            return Err(AllocationError::LengthMismatch {
                expected: target.total_length,
                actual: region.len(),
            }
            .into());
        }

        let ranges = partition(target.total_length, self.config.parallelism);
        let started = Instant::now();

        tracing::info!(
            url = %target.url,
            name = %target.display_name,
            total_length = target.total_length,
            parallelism = ranges.len(),
            "starting parallel download"
        );

        // Child token: sibling failures cancel workers without touching the
        // caller's token. The guard cancels stragglers if this future is dropped.
        let workers = cancel.child_token();
        let _guard = workers.clone().drop_guard();
        let url: Arc<str> = Arc::from(target.url.as_str());

        let handles: Vec<_> = ranges
            .iter()
            .enumerate()
            .map(|(index, &range)| {
                let job = RangeJob {
                    client: self.client.clone(),
                    url: Arc::clone(&url),
                    headers: self.headers.clone(),
                    range,
                    total_length: target.total_length,
                    buffer_size: self.config.buffer_size,
                    timeout: self.config.timeout,
                    region: Arc::clone(&region),
                    progress: Arc::clone(&progress),
                    cancel: workers.clone(),
                };
                let siblings = workers.clone();
                tokio::spawn(async move {
                    tracing::debug!(index, %range, "range worker started");
                    let result = job.run().await;
                    match &result {
                        Ok(bytes) => tracing::debug!(index, %range, bytes, "range worker finished"),
                        Err(e) if e.is_cancellation() => {
                            tracing::debug!(index, %range, "range worker cancelled")
                        }
                        Err(e) => {
                            tracing::warn!(index, %range, error = %e, "range worker failed");
                            siblings.cancel();
                        }
                    }
                    result
                })
            })
            .collect();

        let mut first_error: Option<RangeFetchError> = None;
        let mut cancelled = false;

        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    workers.cancel();
                    Err(RangeFetchError::Panicked {
                        index,
                        message: e.to_string(),
                    })
                }
            };
            match result {
                Ok(_) => {}
                Err(e) if e.is_cancellation() => cancelled = true,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            tracing::error!(url = %target.url, error = %e, "parallel download failed");
            return Err(e.into());
        }
        if cancelled || cancel.is_cancelled() {
            tracing::info!(url = %target.url, "parallel download cancelled");
            return Err(Error::Cancelled);
        }

        let elapsed = started.elapsed();
        tracing::info!(
            url = %target.url,
            name = %target.display_name,
            total_length = target.total_length,
            elapsed_ms = elapsed.as_millis() as u64,
            "parallel download complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
