//! A single byte-range worker: streamed GET, bounded buffering, positional writes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RANGE};
use tokio_util::sync::CancellationToken;

use crate::error::RangeFetchError;
use crate::region::DestinationRegion;
use crate::types::{ByteRange, ProgressSink};

/// Everything one worker needs, owned so it can run on its own task
pub(super) struct RangeJob {
    pub(super) client: reqwest::Client,
    pub(super) url: Arc<str>,
    pub(super) headers: HeaderMap,
    pub(super) range: ByteRange,
    pub(super) total_length: u64,
    pub(super) buffer_size: usize,
    pub(super) timeout: Duration,
    pub(super) region: Arc<dyn DestinationRegion>,
    pub(super) progress: Arc<dyn ProgressSink>,
    pub(super) cancel: CancellationToken,
}

impl RangeJob {
    /// Fetch the range and write it into the region. Returns bytes written.
    pub(super) async fn run(self) -> Result<u64, RangeFetchError> {
        let range = self.range;
        let Some(range_header) = range.header_value() else {
            return Ok(0);
        };

        let request = self
            .client
            .get(&*self.url)
            .headers(self.headers.clone())
            .header(RANGE, range_header);

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RangeFetchError::Cancelled { range }),
            sent = tokio::time::timeout(self.timeout, request.send()) => match sent {
                Err(_) => return Err(RangeFetchError::TimedOut { range, after: self.timeout }),
                Ok(Err(source)) => return Err(RangeFetchError::Transport { range, source }),
                Ok(Ok(response)) => response,
            },
        };

        self.check_status(response.status())?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.initial_capacity());
        let mut cursor = range.start;
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RangeFetchError::Cancelled { range }),
                next = tokio::time::timeout(self.timeout, stream.next()) => match next {
                    Err(_) => return Err(RangeFetchError::TimedOut { range, after: self.timeout }),
                    Ok(next) => next,
                },
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|source| RangeFetchError::Transport { range, source })?;

            received += chunk.len() as u64;
            if received > range.len {
                return Err(RangeFetchError::Overrun { range, received });
            }

            buffer.extend_from_slice(&chunk);
            while buffer.len() >= self.buffer_size {
                let rest = buffer.split_off(self.buffer_size);
                let full = std::mem::replace(&mut buffer, rest);
                cursor = self.write(cursor, full).await?;
            }
        }

        if !buffer.is_empty() {
            cursor = self.write(cursor, buffer).await?;
        }

        if received < range.len {
            return Err(RangeFetchError::Truncated {
                range,
                expected: range.len,
                received,
            });
        }

        debug_assert_eq!(cursor, range.end());
        Ok(received)
    }

    /// 206 is always acceptable; 200 only when this range is the whole resource.
    fn check_status(&self, status: StatusCode) -> Result<(), RangeFetchError> {
        let range = self.range;
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            return Err(RangeFetchError::Status {
                range,
                status: status.as_u16(),
            });
        }
        if status == StatusCode::OK && range.start == 0 && range.len == self.total_length {
            return Ok(());
        }
        Err(RangeFetchError::RangeNotHonored { range })
    }

    fn initial_capacity(&self) -> usize {
        let len = usize::try_from(self.range.len).unwrap_or(usize::MAX);
        len.min(self.buffer_size)
    }

    async fn write(&self, offset: u64, data: Vec<u8>) -> Result<u64, RangeFetchError> {
        let written = data.len() as u64;
        self.region
            .write_at(offset, data)
            .await
            .map_err(|source| RangeFetchError::Write {
                range: self.range,
                offset,
                source,
            })?;
        self.progress.advance(written);
        Ok(offset + written)
    }
}
