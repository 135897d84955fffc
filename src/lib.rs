//! # mirror-dl
//!
//! Parallel byte-range downloader for model-hub blobs served from a mirror
//! endpoint.
//!
//! ## Design Philosophy
//!
//! mirror-dl is designed to be:
//! - **Injected, not patched** - The host supplies URL resolution, metadata
//!   lookup and a sequential downloader as trait implementations
//! - **Explicitly configured** - One [`Config`] value, no process globals
//! - **Fail-whole** - A transfer either fills its destination completely or
//!   reports a single error; partial output is discarded
//!
//! ## How a transfer runs
//!
//! 1. A `HEAD` probe learns the resource length and a display name
//! 2. The destination is pre-sized to exactly that length
//! 3. The length is split into `parallelism` contiguous ranges, each fetched
//!    by its own task and written at its absolute offset
//! 4. All workers are joined; the first failure cancels the rest
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use mirror_dl::{AtomicProgress, Config, ParallelFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = ParallelFetcher::new(Config {
//!         parallelism: 8,
//!         ..Default::default()
//!     })?;
//!
//!     let progress = AtomicProgress::new();
//!     let target = fetcher
//!         .download_to_path(
//!             "https://link.storjshare.io/raw/bucket/lfs/repos/ab/cd/blob",
//!             Path::new("blob.bin"),
//!             Arc::new(progress.clone()),
//!         )
//!         .await?;
//!
//!     println!("{}: {} bytes", target.display_name, progress.get());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Parallel range download engine
pub mod fetcher;
/// Mirror redirection and transfer routing
pub mod mirror;
/// Header-only resource probe
pub mod probe;
/// Pre-sized destination regions
pub mod region;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, RetryConfig, build_client};
pub use error::{AllocationError, Error, ProbeError, RangeFetchError, Result};
pub use fetcher::{ParallelFetcher, partition};
pub use mirror::{
    FallbackReason, MetadataFetcher, MirrorDownloader, MirrorMetadataFetcher, PathDecision,
    SequentialDownloader, SequentialRequest, UrlResolver, choose_path, redirect_location,
};
pub use region::{DestinationRegion, FileRegion, MemoryRegion, prepare_file};
pub use types::{
    AtomicProgress, ByteRange, FetchReport, FileMetadata, NoProgress, ProgressSink, ResourceId,
    TransferPath, TransferTarget,
};
