//! Stub collaborators recording how they were called

use async_trait::async_trait;
use mirror_dl::{
    FileMetadata, MetadataFetcher, ProgressSink, ResourceId, Result, SequentialDownloader,
    SequentialRequest, UrlResolver,
};
use std::sync::{Arc, Mutex};

/// Bytes the stub sequential downloader writes
pub const SEQUENTIAL_MARKER: &[u8] = b"sequential";

/// Resolves every resource under a fixed hub base URL
pub struct StubResolver {
    pub base: String,
}

impl UrlResolver for StubResolver {
    fn resolve(&self, resource: &ResourceId) -> Result<String> {
        let revision = resource.revision.as_deref().unwrap_or("main");
        Ok(format!(
            "{}/{}/resolve/{}/{}",
            self.base, resource.repo_id, revision, resource.filename
        ))
    }
}

/// Reports the same metadata for every URL and records the URLs asked for
pub struct StubMetadata {
    pub metadata: FileMetadata,
    pub requested: Arc<Mutex<Vec<String>>>,
}

impl StubMetadata {
    pub fn at(location: &str, size: u64) -> Self {
        Self {
            metadata: FileMetadata {
                commit_hash: Some("0123abcd".to_string()),
                etag: Some("\"blob-etag\"".to_string()),
                location: location.to_string(),
                size: Some(size),
            },
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MetadataFetcher for StubMetadata {
    async fn fetch_metadata(&self, url: &str) -> Result<FileMetadata> {
        self.requested.lock().unwrap().push(url.to_string());
        Ok(self.metadata.clone())
    }
}

/// One recorded sequential download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialCall {
    pub url: String,
    pub resume_offset: u64,
}

/// Writes a marker instead of downloading, recording every call
#[derive(Clone, Default)]
pub struct RecordingSequential {
    pub calls: Arc<Mutex<Vec<SequentialCall>>>,
}

impl RecordingSequential {
    pub fn calls(&self) -> Vec<SequentialCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SequentialDownloader for RecordingSequential {
    async fn download(
        &self,
        request: SequentialRequest<'_>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(SequentialCall {
            url: request.url.to_string(),
            resume_offset: request.resume_offset,
        });
        tokio::fs::write(request.destination, SEQUENTIAL_MARKER).await?;
        progress.advance(SEQUENTIAL_MARKER.len() as u64);
        Ok(())
    }
}
