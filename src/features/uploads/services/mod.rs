mod assembler;
mod chunk_receiver;
mod session_locks;
mod session_registry;
mod upload_service;

pub use assembler::{AssembledFile, Assembler};
pub use chunk_receiver::{ChunkReceipt, ChunkReceiver};
pub use session_registry::UploadSessionRegistry;
pub use upload_service::UploadService;
