//! Mirror redirection and transfer routing
//!
//! The host application supplies three capabilities:
//! - [`UrlResolver`] builds the canonical URL of a repository file
//! - [`MetadataFetcher`] looks up where that file's bytes actually live
//! - [`SequentialDownloader`] performs a plain single-stream download
//!
//! [`MirrorMetadataFetcher`] rewrites origin-CDN locations onto the mirror,
//! and [`MirrorDownloader`] decides per transfer whether the parallel
//! range engine or the sequential collaborator handles it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::fetcher::ParallelFetcher;
use crate::types::{
    FetchReport, FileMetadata, ProgressSink, ResourceId, TransferPath, TransferTarget,
};

/// Builds the canonical download URL for a repository file
pub trait UrlResolver: Send + Sync {
    /// Resolve `resource` to a URL the metadata fetcher understands
    fn resolve(&self, resource: &ResourceId) -> Result<String>;
}

/// Looks up metadata (including the real blob location) for a resolved URL
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch metadata for `url`
    async fn fetch_metadata(&self, url: &str) -> Result<FileMetadata>;
}

/// Parameters for a sequential download
#[derive(Debug, Clone, Copy)]
pub struct SequentialRequest<'a> {
    /// Location to download from
    pub url: &'a str,
    /// File to write (or append to, when resuming)
    pub destination: &'a Path,
    /// Bytes already present in `destination`
    pub resume_offset: u64,
    /// Extra request headers
    pub headers: &'a HeaderMap,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Plain single-stream download, used whenever the parallel path does not apply
#[async_trait]
pub trait SequentialDownloader: Send + Sync {
    /// Download `request.url` into `request.destination`
    async fn download(
        &self,
        request: SequentialRequest<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<()>;
}

/// Why a transfer was routed to the sequential path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The parallel path is switched off in the configuration
    Disabled,
    /// Parallelism is 1, so there is nothing to split
    ParallelismTooLow,
    /// A partial download is being resumed
    ResumeInProgress,
    /// The URL is not on the mirror endpoint
    NotMirror,
    /// The server did not advertise byte-range support
    RangesUnsupported,
}

/// Which path a transfer should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDecision {
    /// Split into byte ranges and fetch concurrently
    Parallel,
    /// Hand over to the sequential collaborator
    Sequential(FallbackReason),
}

/// Decide, before any network activity, whether `url` may use the parallel path
///
/// Checks are evaluated in a fixed order and the first failing one is reported.
pub fn choose_path(config: &Config, url: &str, resume_offset: u64) -> PathDecision {
    if !config.enabled {
        PathDecision::Sequential(FallbackReason::Disabled)
    } else if config.parallelism <= 1 {
        PathDecision::Sequential(FallbackReason::ParallelismTooLow)
    } else if resume_offset > 0 {
        PathDecision::Sequential(FallbackReason::ResumeInProgress)
    } else if !is_mirror_url(config, url) {
        PathDecision::Sequential(FallbackReason::NotMirror)
    } else {
        PathDecision::Parallel
    }
}

/// True if `url` is served by the configured mirror endpoint
///
/// Host names are compared case-insensitively together with the effective
/// port, so an explicit default port still matches.
pub fn is_mirror_url(config: &Config, url: &str) -> bool {
    let (Ok(candidate), Ok(mirror)) = (
        url::Url::parse(url),
        url::Url::parse(&config.mirror_url_prefix),
    ) else {
        return false;
    };
    match (candidate.host_str(), mirror.host_str()) {
        (Some(a), Some(b)) => {
            a.eq_ignore_ascii_case(b)
                && candidate.port_or_known_default() == mirror.port_or_known_default()
        }
        _ => false,
    }
}

/// Rewrite an origin-CDN `location` onto the mirror
///
/// Returns `None` when redirection is disabled or the location is on any
/// other host. The query string is dropped; the mirror addresses blobs by
/// path alone.
///
/// # Examples
///
/// ```
/// use mirror_dl::config::Config;
/// use mirror_dl::mirror::redirect_location;
///
/// let config = Config {
///     mirror_url_prefix: "https://mirror.example/lfs".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(
///     redirect_location(&config, "https://cdn-lfs.huggingface.co/repos/ab/cd?sig=1").as_deref(),
///     Some("https://mirror.example/lfs/repos/ab/cd")
/// );
/// assert_eq!(redirect_location(&config, "https://example.com/x"), None);
/// ```
pub fn redirect_location(config: &Config, location: &str) -> Option<String> {
    if !config.enabled {
        return None;
    }
    let parsed = url::Url::parse(location).ok()?;
    let host = parsed.host_str()?;
    if !host.eq_ignore_ascii_case(&config.origin_host) {
        return None;
    }
    Some(format!(
        "{}{}",
        config.mirror_url_prefix.trim_end_matches('/'),
        parsed.path()
    ))
}

/// Metadata fetcher decorator that points origin-CDN locations at the mirror
pub struct MirrorMetadataFetcher<M> {
    inner: M,
    config: Arc<Config>,
}

impl<M: MetadataFetcher> MirrorMetadataFetcher<M> {
    /// Wrap `inner`, redirecting according to `config`
    pub fn new(inner: M, config: Arc<Config>) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<M: MetadataFetcher> MetadataFetcher for MirrorMetadataFetcher<M> {
    async fn fetch_metadata(&self, url: &str) -> Result<FileMetadata> {
        let mut metadata = self.inner.fetch_metadata(url).await?;
        if let Some(redirected) = redirect_location(&self.config, &metadata.location) {
            tracing::debug!(
                from = %metadata.location,
                to = %redirected,
                "redirecting blob location to mirror"
            );
            metadata.location = redirected;
        }
        Ok(metadata)
    }
}

/// Resolves, redirects and downloads repository files
///
/// The host application's URL resolution and metadata lookup run unchanged;
/// only the blob location and the transfer strategy differ.
pub struct MirrorDownloader<R, M, S> {
    resolver: R,
    metadata: MirrorMetadataFetcher<M>,
    sequential: S,
    fetcher: ParallelFetcher,
}

impl<R, M, S> MirrorDownloader<R, M, S>
where
    R: UrlResolver,
    M: MetadataFetcher,
    S: SequentialDownloader,
{
    /// Create a downloader with an HTTP client built from `config`
    pub fn new(config: Config, resolver: R, metadata: M, sequential: S) -> Result<Self> {
        let fetcher = ParallelFetcher::new(config)?;
        Ok(Self::from_fetcher(fetcher, resolver, metadata, sequential))
    }

    /// Create a downloader around an existing parallel fetcher
    pub fn from_fetcher(fetcher: ParallelFetcher, resolver: R, metadata: M, sequential: S) -> Self {
        let config = Arc::new(fetcher.config().clone());
        Self {
            resolver,
            metadata: MirrorMetadataFetcher::new(metadata, config),
            sequential,
            fetcher,
        }
    }

    /// Resolve `resource`, look up its location, and download it to `destination`
    pub async fn fetch(
        &self,
        resource: &ResourceId,
        destination: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<FetchReport> {
        let url = self.resolver.resolve(resource)?;
        tracing::debug!(
            repo_id = %resource.repo_id,
            filename = %resource.filename,
            url = %url,
            "resolved file URL"
        );

        let metadata = self.metadata.fetch_metadata(&url).await?;
        let location = metadata.location.clone();
        let (path, target) = self.download(&location, destination, 0, progress).await?;

        Ok(FetchReport {
            location,
            metadata,
            path,
            target,
        })
    }

    /// Download `url` into `destination`, choosing the transfer path
    ///
    /// Returns the path taken and, for the parallel path, the probed target.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        resume_offset: u64,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(TransferPath, Option<TransferTarget>)> {
        self.download_with_cancel(url, destination, resume_offset, progress, CancellationToken::new())
            .await
    }

    /// Like [`download`](Self::download), with caller-driven cancellation of the parallel path
    pub async fn download_with_cancel(
        &self,
        url: &str,
        destination: &Path,
        resume_offset: u64,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<(TransferPath, Option<TransferTarget>)> {
        let config = self.fetcher.config();

        if let PathDecision::Sequential(reason) = choose_path(config, url, resume_offset) {
            tracing::debug!(url, ?reason, "using sequential download");
            self.sequential(url, destination, resume_offset, progress).await?;
            return Ok((TransferPath::Sequential, None));
        }

        let target = self.fetcher.probe(url).await?;
        if config.require_accept_ranges && !target.accepts_ranges {
            tracing::warn!(
                url,
                reason = ?FallbackReason::RangesUnsupported,
                "server does not advertise byte ranges, using sequential download"
            );
            self.sequential(url, destination, resume_offset, progress).await?;
            return Ok((TransferPath::Sequential, None));
        }

        self.fetcher
            .download_target(&target, destination, progress, cancel)
            .await?;
        Ok((TransferPath::Parallel, Some(target)))
    }

    async fn sequential(
        &self,
        url: &str,
        destination: &Path,
        resume_offset: u64,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        let config = self.fetcher.config();
        let headers = config.header_map()?;
        let request = SequentialRequest {
            url,
            destination,
            resume_offset,
            headers: &headers,
            timeout: config.timeout,
        };
        self.sequential.download(request, progress).await
    }
}
