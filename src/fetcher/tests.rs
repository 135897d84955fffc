// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::error::ProbeError;
use crate::region::MemoryRegion;
use crate::types::AtomicProgress;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const BLOB_PATH: &str = "/lfs/blob";

/// Answers GET requests with the slice of `body` named by the Range header.
struct RangeResponder {
    body: Arc<Vec<u8>>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(spec) = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.as_slice().to_vec());
        };
        let (start, end) = spec.split_once('-').unwrap();
        let start: usize = start.parse().unwrap();
        let end: usize = end.parse().unwrap();
        ResponseTemplate::new(206)
            .insert_header(
                "Content-Range",
                format!("bytes {}-{}/{}", start, end, self.body.len()).as_str(),
            )
            .set_body_bytes(self.body[start..=end].to_vec())
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn serve(body: &[u8]) -> (MockServer, String) {
    let server = MockServer::start().await;
    mount_blob(&server, body).await;
    let url = format!("{}{}", server.uri(), BLOB_PATH);
    (server, url)
}

async fn mount_blob(server: &MockServer, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(BLOB_PATH))
        .respond_with(RangeResponder {
            body: Arc::new(body.to_vec()),
        })
        .mount(server)
        .await;
}

fn fetcher(parallelism: usize, buffer_size: usize) -> ParallelFetcher {
    let config = Config {
        parallelism,
        buffer_size,
        timeout: Duration::from_secs(5),
        check_disk_space: false,
        ..Default::default()
    };
    ParallelFetcher::with_client(reqwest::Client::new(), config).unwrap()
}

fn target(url: &str, total_length: u64) -> TransferTarget {
    TransferTarget {
        url: url.to_string(),
        total_length,
        display_name: "blob".to_string(),
        accepts_ranges: true,
    }
}

async fn fetch_to_memory(
    fetcher: &ParallelFetcher,
    target: &TransferTarget,
) -> (Result<()>, Arc<MemoryRegion>, AtomicProgress) {
    let region = Arc::new(MemoryRegion::new(target.total_length).unwrap());
    let progress = AtomicProgress::new();
    let result = fetcher
        .fetch_into(target, region.clone(), Arc::new(progress.clone()))
        .await;
    (result, region, progress)
}

#[tokio::test]
async fn fills_region_for_various_worker_and_buffer_sizes() {
    let body = payload(10_007);
    let (_server, url) = serve(&body).await;

    for (parallelism, buffer_size) in [(1, 1024), (3, 7), (4, 10_007), (16, 1)] {
        let fetcher = fetcher(parallelism, buffer_size);
        let (result, region, progress) = fetch_to_memory(&fetcher, &target(&url, 10_007)).await;

        result.unwrap();
        assert_eq!(region.snapshot(), body, "P={parallelism} buffer={buffer_size}");
        assert_eq!(progress.get(), 10_007, "P={parallelism} buffer={buffer_size}");
    }
}

#[tokio::test]
async fn short_resource_with_many_workers_issues_one_request() {
    let body = payload(5);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BLOB_PATH))
        .and(header("range", "bytes=0-4"))
        .respond_with(RangeResponder {
            body: Arc::new(body.clone()),
        })
        .expect(1)
        .mount(&server)
        .await;
    let url = format!("{}{}", server.uri(), BLOB_PATH);

    let (result, region, progress) = fetch_to_memory(&fetcher(16, 1024), &target(&url, 5)).await;

    result.unwrap();
    assert_eq!(region.snapshot(), body);
    assert_eq!(progress.get(), 5);
}

#[tokio::test]
async fn zero_length_resource_needs_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (result, _region, progress) =
        fetch_to_memory(&fetcher(4, 1024), &target(&server.uri(), 0)).await;

    result.unwrap();
    assert_eq!(progress.get(), 0);
}

#[tokio::test]
async fn single_worker_accepts_plain_ok_for_whole_resource() {
    let body = payload(300);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let (result, region, _) = fetch_to_memory(&fetcher(1, 64), &target(&server.uri(), 300)).await;

    result.unwrap();
    assert_eq!(region.snapshot(), body);
}

#[tokio::test]
async fn failing_range_fails_the_transfer() {
    let body = payload(100);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=50-99"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_blob(&server, &body).await;
    let url = format!("{}{}", server.uri(), BLOB_PATH);

    let (result, _, _) = fetch_to_memory(&fetcher(2, 16), &target(&url, 100)).await;

    let err = result.unwrap_err();
    assert!(!err.to_string().is_empty());
    match err {
        Error::RangeFetch(RangeFetchError::Status { range, status }) => {
            assert_eq!(status, 500);
            assert_eq!(range, crate::types::ByteRange::new(50, 50));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Serve one connection: answer with 206 and a `Content-Length` of
/// `declared`, send `sent` bytes of body, then drop the socket.
async fn serve_cut_off_body(declared: usize, sent: usize) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes 0-{}/{}\r\n\r\n",
            declared,
            declared - 1,
            declared
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&payload(sent)).await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{}{}", addr, BLOB_PATH)
}

#[tokio::test]
async fn connection_dropped_mid_body_is_a_transport_error() {
    let url = serve_cut_off_body(100, 10).await;

    let (result, _, _) = fetch_to_memory(&fetcher(1, 16), &target(&url, 100)).await;

    let err = result.unwrap_err();
    assert!(!err.to_string().is_empty());
    match err {
        Error::RangeFetch(RangeFetchError::Transport { range, .. }) => {
            assert_eq!(range, crate::types::ByteRange::new(0, 100));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}{}", port, BLOB_PATH);

    let (result, _, _) = fetch_to_memory(&fetcher(4, 16), &target(&url, 100)).await;

    let err = result.unwrap_err();
    assert!(!err.to_string().is_empty());
    assert!(
        matches!(err, Error::RangeFetch(RangeFetchError::Transport { .. })),
        "expected transport error, got {err:?}"
    );
}

#[tokio::test]
async fn ignored_range_header_is_detected() {
    let body = payload(100);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let (result, _, _) = fetch_to_memory(&fetcher(2, 16), &target(&server.uri(), 100)).await;

    assert!(matches!(
        result.unwrap_err(),
        Error::RangeFetch(RangeFetchError::RangeNotHonored { .. })
    ));
}

#[tokio::test]
async fn short_body_is_reported_as_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8; 10]))
        .mount(&server)
        .await;

    let (result, _, _) = fetch_to_memory(&fetcher(1, 16), &target(&server.uri(), 20)).await;

    match result.unwrap_err() {
        Error::RangeFetch(RangeFetchError::Truncated {
            expected, received, ..
        }) => {
            assert_eq!(expected, 20);
            assert_eq!(received, 10);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn oversized_body_is_rejected_before_writing_out_of_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 80]))
        .mount(&server)
        .await;

    let (result, region, _) = fetch_to_memory(&fetcher(2, 1024), &target(&server.uri(), 100)).await;

    assert!(matches!(
        result.unwrap_err(),
        Error::RangeFetch(RangeFetchError::Overrun { .. })
    ));
    // Bytes past each worker's range were never written
    assert!(region.snapshot().iter().all(|&b| b == 0 || b == 7));
}

#[tokio::test]
async fn region_length_must_match_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206))
        .expect(0)
        .mount(&server)
        .await;

    let region = Arc::new(MemoryRegion::new(10).unwrap());
    let err = fetcher(2, 16)
        .fetch_into(&target(&server.uri(), 20), region, Arc::new(AtomicProgress::new()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Allocation(AllocationError::LengthMismatch {
            expected: 20,
            actual: 10
        })
    ));
}

#[tokio::test]
async fn first_failure_cancels_slow_siblings() {
    let body = payload(100);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=0-49"))
        .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=50-99"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_blob(&server, &body).await;
    let url = format!("{}{}", server.uri(), BLOB_PATH);

    let mut config = fetcher(2, 16).config().clone();
    config.timeout = Duration::from_secs(60);
    let fetcher = ParallelFetcher::with_client(reqwest::Client::new(), config).unwrap();

    let started = std::time::Instant::now();
    let (result, _, _) = fetch_to_memory(&fetcher, &target(&url, 100)).await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "sibling should be cancelled, took {:?}",
        started.elapsed()
    );
    // The cancelled sibling comes first in dispatch order but the real failure is reported
    assert!(matches!(
        result.unwrap_err(),
        Error::RangeFetch(RangeFetchError::Status { status: 503, .. })
    ));
}

#[tokio::test]
async fn caller_cancellation_stops_the_transfer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let fetcher = fetcher(4, 16);
    let region = Arc::new(MemoryRegion::new(100).unwrap());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = fetcher
        .fetch_into_with_cancel(
            &target(&server.uri(), 100),
            region,
            Arc::new(AtomicProgress::new()),
            cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn stalled_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let mut config = fetcher(1, 16).config().clone();
    config.timeout = Duration::from_millis(200);
    let fetcher = ParallelFetcher::with_client(reqwest::Client::new(), config).unwrap();

    let (result, _, _) = fetch_to_memory(&fetcher, &target(&server.uri(), 10)).await;

    assert!(matches!(
        result.unwrap_err(),
        Error::RangeFetch(RangeFetchError::TimedOut { .. })
    ));
}

#[tokio::test]
async fn download_to_path_probes_and_fills_file() {
    let body = payload(64 * 1024 + 3);
    let (_server, url) = serve(&body).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("blob.bin");
    let progress = AtomicProgress::new();

    let target = fetcher(8, 4096)
        .download_to_path(&url, &dest, Arc::new(progress.clone()))
        .await
        .unwrap();

    assert_eq!(target.total_length, body.len() as u64);
    assert!(target.accepts_ranges);
    assert_eq!(progress.get(), body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn failed_download_removes_destination() {
    let body = payload(100);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=0-24"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_blob(&server, &body).await;
    let url = format!("{}{}", server.uri(), BLOB_PATH);
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("blob.bin");

    let result = fetcher(4, 16)
        .download_to_path(&url, &dest, Arc::new(AtomicProgress::new()))
        .await;

    assert!(result.is_err());
    assert!(!dest.exists(), "incomplete destination should be removed");
}

#[tokio::test]
async fn probe_failure_creates_no_destination() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("blob.bin");

    let err = fetcher(4, 16)
        .download_to_path(&server.uri(), &dest, Arc::new(AtomicProgress::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Probe(ProbeError::Status { status: 404, .. })));
    assert!(!dest.exists());
}

#[test]
fn invalid_config_fails_before_any_request() {
    let config = Config {
        parallelism: 0,
        ..Default::default()
    };
    assert!(matches!(
        ParallelFetcher::new(config),
        Err(Error::Config { .. })
    ));

    let mut config = Config::default();
    config.retry.max_attempts = 2;
    config.retry.backoff_multiplier = -1.0;
    assert!(matches!(
        ParallelFetcher::new(config),
        Err(Error::Config { .. })
    ));
}
