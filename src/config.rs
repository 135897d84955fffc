//! Configuration types for mirror-dl

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Default mirror endpoint that origin blobs are redirected to
pub const DEFAULT_MIRROR_URL_PREFIX: &str =
    "https://link.storjshare.io/raw/juzlwaj7ovnst5gtkv2km3rkriha/lfs-huggingface";

/// Default origin CDN host whose blobs are redirected
pub const DEFAULT_ORIGIN_HOST: &str = "cdn-lfs.huggingface.co";

/// Largest accepted number of range workers for one resource
pub const MAX_PARALLELISM: usize = 1024;

/// Main configuration for the parallel fetcher
///
/// Passed explicitly to [`ParallelFetcher`](crate::fetcher::ParallelFetcher)
/// and [`MirrorDownloader`](crate::mirror::MirrorDownloader); there is no
/// process-global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Use the parallel path at all (default: true)
    ///
    /// `false` forces every transfer through the sequential collaborator and
    /// disables mirror redirection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of concurrent range workers per resource (default: 16)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Base URL substituted for the origin host when redirecting
    #[serde(default = "default_mirror_url_prefix")]
    pub mirror_url_prefix: String,

    /// Host whose locations are redirected to the mirror
    #[serde(default = "default_origin_host")]
    pub origin_host: String,

    /// Upper bound on bytes buffered per worker before a write (default: 10 MiB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Timeout applied to each probe and range request (default: 10 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Extra headers sent with every request (e.g. credentials)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Proxy URL used by [`build_client`] (None = system default)
    #[serde(default)]
    pub proxy: Option<String>,

    /// Fall back to sequential unless the probe advertises `Accept-Ranges: bytes`
    /// (default: false)
    #[serde(default)]
    pub require_accept_ranges: bool,

    /// Check free disk space before pre-allocating the destination (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,

    /// Retry policy for the header probe
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            parallelism: default_parallelism(),
            mirror_url_prefix: default_mirror_url_prefix(),
            origin_host: default_origin_host(),
            buffer_size: default_buffer_size(),
            timeout: default_timeout(),
            headers: HashMap::new(),
            proxy: None,
            require_accept_ranges: false,
            check_disk_space: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Reject invalid settings before any network activity
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::config("parallelism", "parallelism must be at least 1"));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(Error::config(
                "parallelism",
                format!(
                    "parallelism {} exceeds the maximum of {}",
                    self.parallelism, MAX_PARALLELISM
                ),
            ));
        }
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size", "buffer_size must be at least 1 byte"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout", "timeout must be greater than zero"));
        }
        let prefix = url::Url::parse(&self.mirror_url_prefix).map_err(|e| {
            Error::config(
                "mirror_url_prefix",
                format!("invalid mirror URL prefix {:?}: {}", self.mirror_url_prefix, e),
            )
        })?;
        if prefix.host_str().is_none() {
            return Err(Error::config(
                "mirror_url_prefix",
                format!("mirror URL prefix {:?} has no host", self.mirror_url_prefix),
            ));
        }
        if let Some(proxy) = &self.proxy {
            reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                Error::config("proxy", format!("invalid proxy {:?}: {}", proxy, e))
            })?;
        }
        self.header_map()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Extra headers as a typed header map
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config("headers", format!("invalid header name {:?}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::config("headers", format!("invalid value for header {}: {}", name, e))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Build an HTTP client from the proxy and timeout settings
///
/// Callers with their own auth, redirect or retry middleware should build a
/// `reqwest::Client` themselves and pass it in instead.
pub fn build_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.timeout)
        .user_agent(concat!("mirror-dl/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| Error::config("proxy", format!("invalid proxy {:?}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Retry configuration with exponential backoff
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 0, no retries)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Reject backoff settings that cannot produce a delay schedule
    pub fn validate(&self) -> Result<()> {
        let multiplier = self.backoff_multiplier;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!("backoff multiplier must be a finite number >= 1.0, got {}", multiplier),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::config(
                "retry.initial_delay",
                format!(
                    "initial delay {:?} is longer than max delay {:?}",
                    self.initial_delay, self.max_delay
                ),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    16
}

fn default_mirror_url_prefix() -> String {
    DEFAULT_MIRROR_URL_PREFIX.to_string()
}

fn default_origin_host() -> String {
    DEFAULT_ORIGIN_HOST.to_string()
}

fn default_buffer_size() -> usize {
    10 * 1024 * 1024
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
