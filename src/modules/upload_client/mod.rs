//! Client side of the chunked upload protocol
//!
//! Splits a file into the chunks the server hands out at initialize,
//! uploads them with bounded parallelism, retries transient failures with
//! exponential backoff and resumes interrupted uploads from the server's
//! view of which chunks are missing.

mod cli;
pub mod client;
pub mod retry;

pub use cli::{run_upload_command, UploadArgs};
