//! Header-only probe of a transfer target
//!
//! Issues a `HEAD` request to learn the resource length, whether the server
//! advertises byte-range support, and a display name for progress output.

use crate::config::Config;
use crate::error::{ProbeError, Result};
use crate::retry::with_retry;
use crate::types::TransferTarget;
use crate::utils::display_name;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap};

/// Probe `url` and return the populated [`TransferTarget`]
///
/// The URL must already point at the final location; redirects are followed
/// by the HTTP client, not here. Transient failures are retried according to
/// `config.retry`.
pub async fn probe(client: &reqwest::Client, url: &str, config: &Config) -> Result<TransferTarget> {
    let headers = config.header_map()?;
    let target = with_retry(&config.retry, || {
        probe_once(client, url, headers.clone(), config)
    })
    .await?;

    tracing::debug!(
        url = %target.url,
        total_length = target.total_length,
        display_name = %target.display_name,
        accepts_ranges = target.accepts_ranges,
        "probed transfer target"
    );
    Ok(target)
}

async fn probe_once(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    config: &Config,
) -> std::result::Result<TransferTarget, ProbeError> {
    let response = client
        .head(url)
        .headers(headers)
        .timeout(config.timeout)
        .send()
        .await
        .map_err(|source| ProbeError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    // Read the header directly: the body of a HEAD response is always empty,
    // so the client's own content-length accessor reports zero.
    let total_length = content_length(response.headers(), url)?;

    Ok(TransferTarget {
        url: url.to_string(),
        total_length,
        display_name: display_name(response.headers(), url),
        accepts_ranges: accepts_byte_ranges(response.headers()),
    })
}

fn content_length(headers: &HeaderMap, url: &str) -> std::result::Result<u64, ProbeError> {
    let raw = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| ProbeError::MissingContentLength {
            url: url.to_string(),
        })?;

    let invalid = || ProbeError::InvalidContentLength {
        url: url.to_string(),
        value: String::from_utf8_lossy(raw.as_bytes()).into_owned(),
    };

    raw.to_str()
        .map_err(|_| invalid())?
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid())
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}
