//! Mock mirror server and payload generators

use mirror_dl::Config;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock mirror serves its blob under
pub const BLOB_PATH: &str = "/lfs/repos/ab/cd/blob";

/// Deterministic payload whose bytes differ between neighbouring ranges
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Full URL of the blob on `server`
pub fn blob_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), BLOB_PATH)
}

/// Config whose mirror endpoint is `server`
pub fn mirror_config(server: &MockServer, parallelism: usize) -> Config {
    Config {
        parallelism,
        mirror_url_prefix: format!("{}/lfs", server.uri()),
        buffer_size: 64 * 1024,
        timeout: Duration::from_secs(10),
        check_disk_space: false,
        ..Default::default()
    }
}

/// Mount a HEAD responder advertising `body`'s length and a filename
pub async fn mount_head(server: &MockServer, body: &[u8], filename: &str) {
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .insert_header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\";", filename).as_str(),
                )
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Mount one GET responder per inclusive `(start, end)` range, each expected exactly once
pub async fn mount_exact_ranges(server: &MockServer, body: &[u8], ranges: &[(usize, usize)]) {
    for &(start, end) in ranges {
        Mock::given(method("GET"))
            .and(path(BLOB_PATH))
            .and(header("range", format!("bytes={}-{}", start, end).as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, body.len()).as_str(),
                    )
                    .set_body_bytes(body[start..=end].to_vec()),
            )
            .expect(1)
            .named(format!("range {}-{}", start, end))
            .mount(server)
            .await;
    }
}

/// Mount HEAD and GET responders that must never be hit
pub async fn forbid_requests(server: &MockServer) {
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .named("unexpected HEAD")
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .named("unexpected GET")
        .mount(server)
        .await;
}

/// Mount GET responders for ranges that may be skipped when a sibling fails first
pub async fn mount_optional_ranges(server: &MockServer, body: &[u8], ranges: &[(usize, usize)]) {
    for &(start, end) in ranges {
        Mock::given(method("GET"))
            .and(path(BLOB_PATH))
            .and(header("range", format!("bytes={}-{}", start, end).as_str()))
            .respond_with(
                ResponseTemplate::new(206).set_body_bytes(body[start..=end].to_vec()),
            )
            .expect(0..=1)
            .mount(server)
            .await;
    }
}
