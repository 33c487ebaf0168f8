mod core;
mod features;
mod modules;
mod shared;

use crate::core::config::{Config, StorageBackend};
use crate::core::{database, router};
use crate::features::uploads::{SessionReaper, UploadService, UploadSessionRegistry};
use crate::modules::session_store::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::modules::storage::{
    ArtifactStore, ChunkStore, LocalArtifactStore, LocalChunkStore, MemoryChunkStore,
    MinIOArtifactStore, MinIOChunkStore, MinIOClient,
};
use crate::modules::upload_client::UploadArgs;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chunked, resumable upload server for claim documents
#[derive(Parser, Debug)]
#[command(name = "claimdoc-core", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload server (default)
    Serve,
    /// Upload a file to a running server
    Upload(UploadArgs),
}

fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env-backed flags and RUST_LOG see it
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Build Tokio runtime with configurable worker threads
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(worker_threads * 4)
        .enable_all()
        .build()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => runtime.block_on(async_main(worker_threads)),
        Command::Upload(args) => runtime.block_on(upload_main(args)),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn upload_main(args: UploadArgs) -> anyhow::Result<()> {
    init_tracing();

    modules::upload_client::run_upload_command(args).await
}

async fn async_main(worker_threads: usize) -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        "System info: available_cpus={}, tokio_worker_threads={}, pid={}",
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
        worker_threads,
        std::process::id()
    );
    tracing::info!("Configuration loaded successfully");

    let session_store = create_session_store(&config).await?;
    let (chunk_store, artifact_store) = create_storage(&config).await?;

    let registry = Arc::new(UploadSessionRegistry::new(
        session_store,
        chunk_store,
        config.upload.clone(),
    ));
    let upload_service = Arc::new(UploadService::new(Arc::clone(&registry), artifact_store));
    tracing::info!(
        "Upload service initialized (default chunk size {} bytes, max file size {} bytes)",
        config.upload.default_chunk_size,
        config.upload.max_file_size
    );

    let reaper = SessionReaper::new(Arc::clone(&registry));
    tokio::spawn(async move {
        reaper.run().await;
    });
    tracing::info!("Upload session reaper spawned");

    let app = router::build_router(upload_service, &config.app, &config.swagger);

    let addr = config.app.server_address();
    let listener = bind_listener(&addr)?;
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// PostgreSQL-backed sessions when a database is configured, in-memory otherwise
async fn create_session_store(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    let Some(db_config) = &config.database else {
        tracing::warn!("DATABASE_URL not set, upload sessions are kept in memory");
        return Ok(Arc::new(MemorySessionStore::new()));
    };

    let pool = database::create_pool(db_config).await?;
    tracing::info!("Database connection pool created");

    tracing::info!("Running database migrations...");
    database::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    tracing::info!("Database migrations completed successfully");

    Ok(Arc::new(PgSessionStore::new(pool)))
}

async fn create_storage(
    config: &Config,
) -> anyhow::Result<(Arc<dyn ChunkStore>, Arc<dyn ArtifactStore>)> {
    match config.storage.backend {
        StorageBackend::Local => {
            tracing::info!(
                "Local upload storage at {}",
                config.upload.scratch_dir.display()
            );
            Ok((
                Arc::new(LocalChunkStore::new(config.upload.chunks_dir())),
                Arc::new(LocalArtifactStore::new(config.upload.files_dir())),
            ))
        }
        StorageBackend::Memory => {
            tracing::warn!("Chunks are kept in memory and lost on restart");
            Ok((
                Arc::new(MemoryChunkStore::new()),
                Arc::new(LocalArtifactStore::new(config.upload.files_dir())),
            ))
        }
        StorageBackend::MinIO => {
            let minio = &config.storage.minio;
            let client = Arc::new(
                MinIOClient::new(minio)
                    .map_err(|e| anyhow::anyhow!("Failed to initialize MinIO client: {}", e))?,
            );
            client
                .ensure_bucket_exists()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to ensure MinIO bucket exists: {}", e))?;
            tracing::info!("MinIO client initialized for bucket: {}", client.bucket_name());

            Ok((
                Arc::new(MinIOChunkStore::new(
                    Arc::clone(&client),
                    minio.chunk_prefix.clone(),
                )),
                Arc::new(MinIOArtifactStore::new(client, minio.artifact_prefix.clone())),
            ))
        }
    }
}

/// TCP listener tuned with socket2
fn bind_listener(addr: &str) -> anyhow::Result<tokio::net::TcpListener> {
    let socket_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(socket_addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;

    // Sized for chunk bodies
    socket.set_recv_buffer_size(1024 * 1024)?;
    socket.set_send_buffer_size(256 * 1024)?;

    let keepalive = socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(60));
    socket.set_tcp_keepalive(&keepalive)?;

    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(1024)?;

    Ok(tokio::net::TcpListener::from_std(socket.into())?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
