use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::config::{AppConfig, SwaggerConfig, UploadConfig};
use crate::core::error::{AppError, Result};
use crate::core::router::build_router;
use crate::features::uploads::{UploadService, UploadSessionRegistry};
use crate::modules::session_store::MemorySessionStore;
use crate::modules::storage::{
    ArtifactStore, ChunkStore, LocalArtifactStore, MemoryChunkStore, StoredArtifact,
};

/// Fully wired application over in-memory sessions and chunks, with
/// assembled files written below a temporary directory
pub struct TestApp {
    pub router: Router,
    pub registry: Arc<UploadSessionRegistry>,
    pub files_dir: PathBuf,
    _dir: TempDir,
}

pub fn test_upload_config(scratch_dir: PathBuf) -> UploadConfig {
    UploadConfig {
        scratch_dir,
        min_chunk_size: 1,
        ..UploadConfig::default()
    }
}

pub fn test_app() -> TestApp {
    test_app_with_chunk_store(Arc::new(MemoryChunkStore::new()))
}

pub fn test_app_with_chunk_store(chunk_store: Arc<dyn ChunkStore>) -> TestApp {
    test_app_with(chunk_store, |_| {})
}

/// Like [`test_app_with_chunk_store`], with a hook to adjust the upload config
pub fn test_app_with(
    chunk_store: Arc<dyn ChunkStore>,
    tune: impl FnOnce(&mut UploadConfig),
) -> TestApp {
    let dir = TempDir::new().expect("create temp dir");
    let mut config = test_upload_config(dir.path().to_path_buf());
    tune(&mut config);
    let files_dir = config.files_dir();

    let registry = Arc::new(UploadSessionRegistry::new(
        Arc::new(MemorySessionStore::new()),
        chunk_store,
        config,
    ));
    let service = Arc::new(UploadService::new(
        Arc::clone(&registry),
        Arc::new(LocalArtifactStore::new(&files_dir)),
    ));

    let app_config = AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_allowed_origins: vec!["*".to_string()],
    };
    let swagger_config = SwaggerConfig {
        username: None,
        password: None,
        title: "Claimdoc API".to_string(),
        version: "test".to_string(),
        description: "test".to_string(),
    };

    TestApp {
        router: build_router(service, &app_config, &swagger_config),
        registry,
        files_dir,
        _dir: dir,
    }
}

/// Serve `router` on an ephemeral local port, returning its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });

    format!("http://{}", addr)
}

/// Deterministic file contents; offsets are recognisable in the output
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Chunk store whose first `failures` writes fail with a transient
/// storage error, optionally only for one chunk index
pub struct FlakyChunkStore {
    inner: MemoryChunkStore,
    only_index: Option<u32>,
    remaining_failures: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyChunkStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryChunkStore::new(),
            only_index: None,
            remaining_failures: AtomicU32::new(failures),
            write_attempts: AtomicU32::new(0),
        }
    }

    pub fn failing_chunk(index: u32, failures: u32) -> Self {
        Self {
            only_index: Some(index),
            ..Self::new(failures)
        }
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkStore for FlakyChunkStore {
    async fn allocate(&self, upload_id: Uuid) -> Result<()> {
        self.inner.allocate(upload_id).await
    }

    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.only_index.is_some_and(|only| only != index) {
            return self.inner.write(upload_id, index, payload).await;
        }
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::Storage("scratch volume unavailable".to_string()));
        }
        self.inner.write(upload_id, index, payload).await
    }

    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes> {
        self.inner.read(upload_id, index).await
    }

    async fn purge(&self, upload_id: Uuid) -> Result<()> {
        self.inner.purge(upload_id).await
    }
}

/// One-shot pause point for interleaving concurrent operations in tests.
///
/// Once armed, the next caller of [`Gate::pass`] signals `entered` and
/// parks until [`Gate::release`]. Later callers go straight through.
#[derive(Default)]
pub struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    /// Wait until a caller is parked in [`Gate::pass`]
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// In-memory chunk store that can hold one read and one write mid-flight
#[derive(Default)]
pub struct GatedChunkStore {
    inner: MemoryChunkStore,
    pub reads: Gate,
    pub writes: Gate,
}

impl GatedChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stored_chunks(&self, upload_id: Uuid) -> usize {
        self.inner.stored_chunks(upload_id).await
    }
}

#[async_trait]
impl ChunkStore for GatedChunkStore {
    async fn allocate(&self, upload_id: Uuid) -> Result<()> {
        self.inner.allocate(upload_id).await
    }

    async fn write(&self, upload_id: Uuid, index: u32, payload: Bytes) -> Result<()> {
        self.writes.pass().await;
        self.inner.write(upload_id, index, payload).await
    }

    async fn read(&self, upload_id: Uuid, index: u32) -> Result<Bytes> {
        self.reads.pass().await;
        self.inner.read(upload_id, index).await
    }

    async fn purge(&self, upload_id: Uuid) -> Result<()> {
        self.inner.purge(upload_id).await
    }
}

/// Local artifact store that can hold one persist before it touches disk
pub struct GatedArtifactStore {
    inner: LocalArtifactStore,
    pub persists: Gate,
}

impl GatedArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalArtifactStore::new(root),
            persists: Gate::default(),
        }
    }
}

#[async_trait]
impl ArtifactStore for GatedArtifactStore {
    async fn persist(
        &self,
        upload_id: Uuid,
        attempt: Uuid,
        filename: &str,
        mime_type: &str,
        staged: &Path,
    ) -> Result<StoredArtifact> {
        self.persists.pass().await;
        self.inner
            .persist(upload_id, attempt, filename, mime_type, staged)
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }
}
