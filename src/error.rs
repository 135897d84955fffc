//! Error types for mirror-dl
//!
//! Errors are grouped by the stage of a transfer that produced them:
//! - [`ProbeError`] for the header-only probe of the target resource
//! - [`AllocationError`] for sizing the destination region
//! - [`RangeFetchError`] for an individual byte-range worker
//!
//! Everything is wrapped in the top-level [`Error`], which is what public
//! operations return.

use crate::types::ByteRange;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mirror-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mirror-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "parallelism")
        key: Option<String>,
    },

    /// The header probe failed or returned no usable length
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// The destination region could not be sized
    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// A byte-range worker failed; the whole transfer is invalid
    #[error("range fetch error: {0}")]
    RangeFetch(#[from] RangeFetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a specific probe or range request
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The transfer was cancelled by the caller
    #[error("transfer cancelled")]
    Cancelled,

    /// An injected collaborator (resolver, metadata fetcher, sequential
    /// downloader) reported a failure
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Errors from the header-only probe of a resource
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The server answered the HEAD request with a non-success status
    #[error("HEAD {url} returned status {status}")]
    Status {
        /// The probed URL
        url: String,
        /// The HTTP status code returned
        status: u16,
    },

    /// The response carried no Content-Length header
    #[error("HEAD {url} returned no Content-Length header")]
    MissingContentLength {
        /// The probed URL
        url: String,
    },

    /// The Content-Length header was not a non-negative integer
    #[error("HEAD {url} returned invalid Content-Length {value:?}")]
    InvalidContentLength {
        /// The probed URL
        url: String,
        /// The raw header value
        value: String,
    },

    /// The request could not be completed at the transport level
    #[error("HEAD {url} failed: {source}")]
    Request {
        /// The probed URL
        url: String,
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },
}

/// Errors from preparing the destination region
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Not enough free space on the destination filesystem
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the destination
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// The destination file could not be opened or created
    #[error("failed to open destination {path}: {source}")]
    Open {
        /// Path of the destination file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The destination could not be grown to the requested length
    #[error("failed to allocate {len} bytes for {path}: {source}")]
    Allocate {
        /// Path of the destination file
        path: PathBuf,
        /// Requested length in bytes
        len: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The region handed to the dispatcher does not match the target length
    #[error("destination region holds {actual} bytes but the resource has {expected}")]
    LengthMismatch {
        /// Length of the resource
        expected: u64,
        /// Length of the supplied region
        actual: u64,
    },

    /// The requested length does not fit in memory on this platform
    #[error("cannot allocate {len} bytes in memory")]
    TooLarge {
        /// Requested length in bytes
        len: u64,
    },
}

/// Errors from a single byte-range worker
#[derive(Debug, Error)]
pub enum RangeFetchError {
    /// The server answered the range request with a non-success status
    #[error("range {range} returned status {status}")]
    Status {
        /// The requested byte range
        range: ByteRange,
        /// The HTTP status code returned
        status: u16,
    },

    /// The request or the body stream failed at the transport level
    #[error("range {range} transport failure: {source}")]
    Transport {
        /// The requested byte range
        range: ByteRange,
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// No response or no body progress within the per-request timeout
    #[error("range {range} timed out after {after:?}")]
    TimedOut {
        /// The requested byte range
        range: ByteRange,
        /// The timeout that elapsed
        after: std::time::Duration,
    },

    /// The server ignored the Range header and sent the full resource
    #[error("range {range} was answered with the full resource (Range header not honored)")]
    RangeNotHonored {
        /// The requested byte range
        range: ByteRange,
    },

    /// The server sent more bytes than the range holds
    #[error("range {range} overran its bounds ({received} bytes received)")]
    Overrun {
        /// The requested byte range
        range: ByteRange,
        /// Bytes received so far, including the overrunning chunk
        received: u64,
    },

    /// The response stream ended before the range was filled
    #[error("range {range} truncated: expected {expected} bytes, received {received}")]
    Truncated {
        /// The requested byte range
        range: ByteRange,
        /// Number of bytes the range holds
        expected: u64,
        /// Number of bytes actually received
        received: u64,
    },

    /// Writing a chunk into the destination region failed
    #[error("range {range} failed to write at offset {offset}: {source}")]
    Write {
        /// The requested byte range
        range: ByteRange,
        /// Absolute offset of the failed write
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The worker stopped because a sibling failed or the caller cancelled
    #[error("range {range} cancelled")]
    Cancelled {
        /// The requested byte range
        range: ByteRange,
    },

    /// The worker task panicked or was aborted
    #[error("range worker {index} did not complete: {message}")]
    Panicked {
        /// Dispatch index of the worker
        index: usize,
        /// Join error message
        message: String,
    },
}

impl RangeFetchError {
    /// True if this worker stopped only because of cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RangeFetchError::Cancelled { .. })
    }
}
