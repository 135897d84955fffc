//! Splitting a resource into contiguous byte ranges, one per worker.

use crate::config::MAX_PARALLELISM;
use crate::types::ByteRange;

/// Split `[0, total_length)` into exactly `parallelism` contiguous ranges
///
/// Every range but the last spans `total_length / parallelism` bytes; the
/// last one absorbs the remainder of the integer division. When
/// `total_length < parallelism` the leading ranges are empty and the last
/// range covers the whole resource. A `parallelism` of zero is treated as one
/// and values above [`MAX_PARALLELISM`] are clamped to it.
///
/// # Examples
///
/// ```
/// use mirror_dl::fetcher::partition;
///
/// let ranges = partition(100, 3);
/// let bounds: Vec<_> = ranges.iter().map(|r| (r.start, r.last())).collect();
/// assert_eq!(bounds, vec![(0, Some(32)), (33, Some(65)), (66, Some(99))]);
/// ```
pub fn partition(total_length: u64, parallelism: usize) -> Vec<ByteRange> {
    let parts = parallelism.clamp(1, MAX_PARALLELISM) as u64;
    let chunk_size = total_length / parts;

    (0..parts)
        .map(|i| {
            let start = i * chunk_size;
            let len = if i == parts - 1 {
                total_length - start
            } else {
                chunk_size
            };
            ByteRange::new(start, len)
        })
        .collect()
}
