#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use quilt_core::config::CombineConfig;
use quilt_core::{InitUpload, UploadRecord};
use quilt_manager::{
    DirectoryHandler, HandlerError, HandlerRegistry, ManagerConfig, UploadHandler, UploadManager,
};
use quilt_metadata::SqliteStore;
use quilt_storage::{
    CombineError, CombineRequest, CombineResult, FileCombiner, FilesystemChunkStore,
    StreamingCombiner, bytes_stream,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const CHUNK_SIZE: u64 = 100;

/// A manager over real filesystem and SQLite stores in a temp directory.
pub struct Harness {
    pub manager: Arc<UploadManager>,
    pub chunk_root: PathBuf,
    pub files: PathBuf,
    _temp: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_combiner(Arc::new(StreamingCombiner)).await
    }

    pub async fn with_combiner(combiner: Arc<dyn FileCombiner>) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let chunk_root = temp.path().join("chunks");
        let files = temp.path().join("files");
        let manager = build_manager(temp.path(), combiner).await;

        Self {
            manager: Arc::new(manager),
            chunk_root,
            files,
            _temp: temp,
        }
    }

    /// A second manager over the same stores, standing in for another process.
    pub async fn peer(&self, combiner: Arc<dyn FileCombiner>) -> UploadManager {
        build_manager(self._temp.path(), combiner).await
    }

    /// Start an upload of `size` bytes with the default handler.
    pub async fn start(&self, name: &str, size: u64) -> UploadRecord {
        self.start_with("default", name, size).await
    }

    pub async fn start_with(&self, handler: &str, name: &str, size: u64) -> UploadRecord {
        self.manager
            .init(
                handler,
                InitUpload {
                    size,
                    name: name.to_string(),
                    mime_type: "application/octet-stream".to_string(),
                    payload: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn send(&self, record: &UploadRecord, chunk: i64, data: Bytes) -> u64 {
        self.manager
            .handle_chunk(record, chunk, bytes_stream(data))
            .await
            .unwrap()
    }

    /// Files currently in the output directory.
    pub fn output_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.files) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn build_manager(root: &Path, combiner: Arc<dyn FileCombiner>) -> UploadManager {
    let files = root.join("files");
    let chunks = Arc::new(FilesystemChunkStore::new(root.join("chunks")).await.unwrap());
    let metadata = Arc::new(SqliteStore::new(root.join("uploads.db"), 5).await.unwrap());

    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(DirectoryHandler::new("default", &files)));
    handlers.register(Arc::new(
        DirectoryHandler::new("small", root.join("small")).with_max_size(10),
    ));
    handlers.register(Arc::new(RecordingHandler {
        inner: DirectoryHandler::new("recording", &files),
    }));

    UploadManager::new(
        chunks,
        combiner,
        metadata,
        handlers,
        ManagerConfig {
            chunk_size: CHUNK_SIZE,
            combine: CombineConfig::default(),
        },
    )
}

/// Reports the record it was handed at completion.
pub struct RecordingHandler {
    inner: DirectoryHandler,
}

#[async_trait]
impl UploadHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn validate(&self, record: &UploadRecord, payload: &Value) -> Result<(), HandlerError> {
        self.inner.validate(record, payload).await
    }

    async fn payload(&self, record: &UploadRecord, payload: Value) -> Value {
        self.inner.payload(record, payload).await
    }

    fn destination(&self, record: &UploadRecord) -> PathBuf {
        self.inner.destination(record)
    }

    async fn completed(&self, record: &UploadRecord, _path: &Path) -> Result<Value, HandlerError> {
        Ok(json!({
            "is_complete": record.is_complete,
            "completed_at": record.completed_at.map(|at| at.unix_timestamp()),
        }))
    }
}

/// Counts combine calls and widens the race window.
pub struct CountingCombiner {
    pub calls: AtomicUsize,
    delay: Duration,
}

impl CountingCombiner {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl FileCombiner for CountingCombiner {
    async fn combine(&self, request: &CombineRequest) -> CombineResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        StreamingCombiner.combine(request).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Fails the first `failures` combines, then delegates to streaming.
pub struct FailingCombiner {
    remaining: AtomicUsize,
    timeout: bool,
}

impl FailingCombiner {
    pub fn new(failures: usize, timeout: bool) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            timeout,
        }
    }
}

#[async_trait]
impl FileCombiner for FailingCombiner {
    async fn combine(&self, request: &CombineRequest) -> CombineResult<u64> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            if self.timeout {
                return Err(CombineError::Timeout(request.timeout));
            }
            return Err(CombineError::Command("cat exited with status 1".to_string()));
        }
        StreamingCombiner.combine(request).await
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
