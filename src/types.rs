//! Core types for mirror-dl

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A resource that has been probed and is ready to transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    /// Final transfer URL (redirects already resolved)
    pub url: String,
    /// Declared length of the resource in bytes
    pub total_length: u64,
    /// Cosmetic name for progress displays
    pub display_name: String,
    /// Whether the probe response advertised `Accept-Ranges: bytes`
    pub accepts_ranges: bool,
}

/// A contiguous byte range of a resource
///
/// Stored as a start offset and a length so that the empty ranges produced
/// when a resource is shorter than the worker count are representable.
/// [`ByteRange::last`] gives the inclusive end used in the `Range` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset covered by the range
    pub start: u64,
    /// Number of bytes in the range
    pub len: u64,
}

impl ByteRange {
    /// Create a range of `len` bytes beginning at `start`
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// True if the range covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inclusive end offset, or `None` for an empty range
    pub fn last(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.start + self.len - 1)
        }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Value for the HTTP `Range` request header, `None` for an empty range
    pub fn header_value(&self) -> Option<String> {
        self.last().map(|last| format!("bytes={}-{}", self.start, last))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last() {
            Some(last) => write!(f, "bytes={}-{}", self.start, last),
            None => write!(f, "empty@{}", self.start),
        }
    }
}

/// Identifies a file in a model-hub repository
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceId {
    /// Repository identifier, e.g. `org/model`
    pub repo_id: String,
    /// File path inside the repository
    pub filename: String,
    /// Optional sub-folder the file lives in
    #[serde(default)]
    pub subfolder: Option<String>,
    /// Repository type (model, dataset, space)
    #[serde(default)]
    pub repo_type: Option<String>,
    /// Branch, tag or commit
    #[serde(default)]
    pub revision: Option<String>,
}

/// Metadata the host library reports for a resolved file URL
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Commit the file belongs to
    pub commit_hash: Option<String>,
    /// Entity tag of the blob
    pub etag: Option<String>,
    /// Location the blob is actually downloaded from
    pub location: String,
    /// Size in bytes, if known
    pub size: Option<u64>,
}

/// Which transfer path handled a download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPath {
    /// Parallel byte-range path into a pre-sized file
    Parallel,
    /// Plain single-stream download by the injected collaborator
    Sequential,
}

/// Summary of a finished download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchReport {
    /// Location the bytes were fetched from (after mirror redirection)
    pub location: String,
    /// Metadata reported for the file
    pub metadata: FileMetadata,
    /// Path that performed the transfer
    pub path: TransferPath,
    /// Probed target, present only for the parallel path
    pub target: Option<TransferTarget>,
}

/// Receives byte-progress updates from concurrent workers
///
/// Implementations must tolerate calls from many tasks at once. No ordering
/// between workers is guaranteed; the sum of all increments equals the
/// resource length after a successful transfer.
pub trait ProgressSink: Send + Sync {
    /// Record that `bytes` more bytes have been written
    fn advance(&self, bytes: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn advance(&self, bytes: u64) {
        self(bytes)
    }
}

/// Lock-free byte counter shared between workers and a UI
#[derive(Clone, Debug, Default)]
pub struct AtomicProgress {
    bytes: Arc<AtomicU64>,
}

impl AtomicProgress {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes recorded so far
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for AtomicProgress {
    fn advance(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Progress sink that discards updates
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _bytes: u64) {}
}
