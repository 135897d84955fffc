//! Probe retries with exponential backoff
//!
//! Only the header probe goes through [`with_retry`]. Range requests are
//! never retried at this layer: a failed range fails the whole transfer and
//! the caller decides whether to start over.
//!
//! ```no_run
//! use mirror_dl::config::RetryConfig;
//! use mirror_dl::retry::with_retry;
//! use mirror_dl::ProbeError;
//! use std::time::Duration;
//!
//! # async fn example(client: reqwest::Client) -> Result<u16, ProbeError> {
//! let retry = RetryConfig {
//!     max_attempts: 3,
//!     initial_delay: Duration::from_millis(200),
//!     ..Default::default()
//! };
//! let url = "https://link.storjshare.io/raw/bucket/lfs/repos/ab/cd/blob";
//! let client = &client;
//! let status = with_retry(&retry, || async move {
//!     let response = client.head(url).send().await.map_err(|source| ProbeError::Request {
//!         url: url.to_string(),
//!         source,
//!     })?;
//!     Ok(response.status().as_u16())
//! })
//! .await?;
//! # Ok(status)
//! # }
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{Error, ProbeError};

/// Classifies a failure as transient (worth another attempt) or final
pub trait IsRetryable {
    /// True if the same request might succeed when repeated
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ProbeError {
    fn is_retryable(&self) -> bool {
        match self {
            ProbeError::Request { source, .. } => source.is_timeout() || source.is_connect(),
            ProbeError::Status { status, .. } => *status == 429 || *status >= 500,
            ProbeError::MissingContentLength { .. } | ProbeError::InvalidContentLength { .. } => {
                false
            }
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Probe(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            Error::RangeFetch(_)
            | Error::Allocation(_)
            | Error::Config { .. }
            | Error::Cancelled
            | Error::Collaborator(_) => false,
        }
    }
}

/// Delay schedule for successive retries
#[derive(Debug, Clone)]
struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay to sleep before the upcoming retry; advances the schedule
    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = current.mul_f64(self.multiplier).min(self.max);
        if self.jitter {
            add_jitter(current)
        } else {
            current
        }
    }
}

/// Run `operation`, retrying transient failures per `config`
///
/// `config.max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. Final errors are returned at once.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut retries = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::debug!(retries, "probe succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retries >= config.max_attempts {
            if retries > 0 {
                tracing::warn!(error = %err, retries, "giving up after retries");
            }
            return Err(err);
        }

        retries += 1;
        let delay = backoff.step();
        tracing::warn!(
            error = %err,
            retry = retries,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Scale `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
