//! Chunked upload tests.
//!
//! Payloads above the 5 MB threshold go through multipart sessions:
//! - Parts are uploaded in order and finalized
//! - A failed part aborts the session and leaves nothing listable
//! - A retried upload starts a fresh session
//! - Content type, metadata and checksum survive the session

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, UploadPart,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docvault_storage_core::storage::{ObjectStoreStrategy, CHUNK_THRESHOLD, PART_SIZE};
use docvault_storage_core::{
    BackendKind, DownloadOptions, ErrorKind, RetryPolicy, StorageOrchestrator, StorageStrategy,
    UploadLimits, UploadOptions,
};

use super::helpers::{backend_config, payload, MB};

/// Shared record of multipart activity; can fail one part index once.
#[derive(Debug, Default)]
struct Recording {
    fail_once_at: Mutex<Option<usize>>,
    part_indexes: Mutex<Vec<usize>>,
    sessions: AtomicUsize,
    aborts: AtomicUsize,
}

/// In-memory store whose multipart sessions report to a [`Recording`].
#[derive(Debug)]
struct RecordingStore {
    inner: InMemory,
    recording: Arc<Recording>,
}

impl fmt::Display for RecordingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordingStore")
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.recording.sessions.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(RecordingUpload {
            inner,
            next_index: 0,
            recording: self.recording.clone(),
        }))
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[derive(Debug)]
struct RecordingUpload {
    inner: Box<dyn MultipartUpload>,
    next_index: usize,
    recording: Arc<Recording>,
}

#[async_trait]
impl MultipartUpload for RecordingUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        let index = self.next_index;
        self.next_index += 1;
        {
            let mut fail = self.recording.fail_once_at.lock();
            if *fail == Some(index) {
                *fail = None;
                return Box::pin(futures::future::ready(Err(object_store::Error::Generic {
                    store: "recording",
                    source: "connection reset by peer".into(),
                })));
            }
        }
        self.recording.part_indexes.lock().push(index);
        self.inner.put_part(data)
    }

    async fn complete(&mut self) -> object_store::Result<PutResult> {
        self.inner.complete().await
    }

    async fn abort(&mut self) -> object_store::Result<()> {
        self.recording.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

fn chunked_orchestrator(
    fail_once_at: Option<usize>,
    retry: RetryPolicy,
) -> (StorageOrchestrator, Arc<Recording>) {
    let recording = Arc::new(Recording {
        fail_once_at: Mutex::new(fail_once_at),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore {
        inner: InMemory::new(),
        recording: recording.clone(),
    });
    let strategy = ObjectStoreStrategy::new(
        BackendKind::S3,
        Some("documents".to_string()),
        store,
        None,
        UploadLimits::default(),
    );
    let orchestrator = StorageOrchestrator::builder()
        .backend_with_strategy(backend_config("s3", 1).with_retry(retry), Arc::new(strategy))
        .build()
        .unwrap();
    (orchestrator, recording)
}

#[test]
fn test_threshold_constants() {
    assert_eq!(CHUNK_THRESHOLD, 5 * MB);
    assert_eq!(PART_SIZE, 5 * MB);
}

#[tokio::test]
async fn test_large_upload_uses_ordered_parts() {
    let (orchestrator, multipart) = chunked_orchestrator(None, RetryPolicy::disabled());

    let file = payload("scans/archive.tiff", 12 * MB, "image/tiff");
    let path = orchestrator
        .upload(&file, &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(path, "s3://documents/scans/archive.tiff");

    assert_eq!(*multipart.part_indexes.lock(), vec![0, 1, 2]);
    assert_eq!(multipart.sessions.load(Ordering::SeqCst), 1);
    assert_eq!(multipart.aborts.load(Ordering::SeqCst), 0);

    let data = orchestrator
        .download(&path, &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(data.len(), 12 * MB);
    assert_eq!(data, file.content);
}

#[tokio::test]
async fn test_small_upload_skips_multipart() {
    let (orchestrator, multipart) = chunked_orchestrator(None, RetryPolicy::disabled());
    orchestrator
        .upload(&payload("small.pdf", 3 * MB, "application/pdf"), &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(multipart.sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_part_aborts_session() {
    let (orchestrator, multipart) = chunked_orchestrator(Some(1), RetryPolicy::disabled());

    let err = orchestrator
        .upload(&payload("big.bin", 12 * MB, "application/octet-stream"), &UploadOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(multipart.aborts.load(Ordering::SeqCst), 1);
    assert!(!orchestrator.exists("big.bin").await.unwrap());
    assert!(orchestrator.list_files(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_starts_fresh_session() {
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        jitter: false,
        ..Default::default()
    };
    let (orchestrator, multipart) = chunked_orchestrator(Some(2), retry);

    let file = payload("big.bin", 11 * MB, "application/octet-stream");
    orchestrator
        .upload(&file, &UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(multipart.sessions.load(Ordering::SeqCst), 2);
    assert_eq!(multipart.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(*multipart.part_indexes.lock(), vec![0, 1, 0, 1, 2]);

    let data = orchestrator
        .download("big.bin", &DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(data, file.content);
}

#[tokio::test]
async fn test_large_upload_keeps_attributes() {
    let (orchestrator, _) = chunked_orchestrator(None, RetryPolicy::disabled());

    let file = payload("contracts/master.pdf", 12 * MB, "application/pdf");
    let options = UploadOptions::default()
        .with_checksum()
        .with_metadata("owner", "alice");
    let path = orchestrator.upload(&file, &options).await.unwrap();

    let info = orchestrator.get_file_info(&path).await.unwrap();
    assert_eq!(info.mime_type, "application/pdf");
    assert_eq!(info.metadata.get("owner").map(String::as_str), Some("alice"));
    assert!(info.metadata.contains_key("sha256"));

    let data = orchestrator
        .download(&path, &DownloadOptions::verified())
        .await
        .unwrap();
    assert_eq!(data, file.content);
}
