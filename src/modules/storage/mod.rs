//! Storage module for upload data
//!
//! Provides the scratch chunk storage used while an upload is in flight and
//! the artifact storage that receives assembled files, each with a local
//! disk and a MinIO/S3-compatible implementation.

mod artifact_store;
mod chunk_store;
mod minio_client;
mod object_chunk_store;

pub use artifact_store::{ArtifactStore, LocalArtifactStore, MinIOArtifactStore, StoredArtifact};
pub use chunk_store::{ChunkStore, LocalChunkStore, MemoryChunkStore};
pub use minio_client::MinIOClient;
pub use object_chunk_store::MinIOChunkStore;
