//! Modules layer - Infrastructure components for external integrations
//!
//! Contains the storage and session-store adapters behind the upload engine
//! and the HTTP client that drives uploads against the service.

pub mod session_store;
pub mod storage;
pub mod upload_client;
