//! Utility functions for header parsing and filesystem queries

use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use std::path::Path;
use std::sync::OnceLock;

/// Names longer than this are shortened for display
const DISPLAY_NAME_MAX_CHARS: usize = 22;

/// Number of trailing characters kept when a name is shortened
const DISPLAY_NAME_TAIL_CHARS: usize = 20;

/// Marker prepended to shortened names
const ELLIPSIS_MARKER: &str = "(…)";

fn quoted_filename_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"filename="(?P<filename>[^"]*)""#).ok())
        .as_ref()
}

/// Extract the filename from a Content-Disposition header value
///
/// Accepts the quoted form (`filename="model.bin"`), the RFC 5987 encoded
/// form (`filename*=UTF-8''model%20v2.bin`) and the bare form
/// (`filename=model.bin`), in that order of preference. Unlike a save-as
/// filename, the extension is kept.
///
/// # Examples
///
/// ```
/// use mirror_dl::utils::content_disposition_filename;
///
/// assert_eq!(
///     content_disposition_filename(r#"attachment; filename="model.safetensors";"#).as_deref(),
///     Some("model.safetensors")
/// );
/// assert_eq!(content_disposition_filename("inline"), None);
/// ```
pub fn content_disposition_filename(value: &str) -> Option<String> {
    if let Some(pattern) = quoted_filename_pattern()
        && let Some(captures) = pattern.captures(value)
        && let Some(name) = captures.name("filename")
        && !name.as_str().is_empty()
    {
        return Some(name.as_str().to_string());
    }

    let mut bare = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            let encoded = match encoded.rfind('\'') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() && bare.is_none() {
                bare = Some(name.to_string());
            }
        }
    }
    bare
}

/// Shorten a name to fit a progress display
///
/// Names of more than 22 characters become `(…)` followed by their last 20
/// characters. Counting is by `char`, so multi-byte names are never split
/// inside a code point.
///
/// # Examples
///
/// ```
/// use mirror_dl::utils::truncate_display_name;
///
/// assert_eq!(truncate_display_name("model.bin"), "model.bin");
/// assert_eq!(
///     truncate_display_name("pytorch_model-00001-of-00002.bin"),
///     "(…)l-00001-of-00002.bin"
/// );
/// ```
#[must_use]
pub fn truncate_display_name(name: &str) -> String {
    let count = name.chars().count();
    if count <= DISPLAY_NAME_MAX_CHARS {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - DISPLAY_NAME_TAIL_CHARS).collect();
    format!("{ELLIPSIS_MARKER}{tail}")
}

/// Derive the display name for a resource from its probe headers
///
/// The Content-Disposition filename wins; otherwise the raw URL is used. The
/// result is always passed through [`truncate_display_name`].
pub fn display_name(headers: &HeaderMap, url: &str) -> String {
    let name = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
        .unwrap_or_else(|| url.to_string());
    truncate_display_name(&name)
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized,
        // and the struct is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out-pointer refers to a
        // live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
