// =============================================================================
// CHUNKED UPLOAD DEFAULTS
// =============================================================================

/// Default chunk size handed to clients at initialize time (5 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Smallest chunk size a client may negotiate (1 KiB)
pub const MIN_CHUNK_SIZE: u64 = 1024;

/// Largest chunk size a client may negotiate (50 MiB)
pub const MAX_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum declared size of a single upload (500 MiB)
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Upper bound on the number of chunks in one session
pub const MAX_TOTAL_CHUNKS: u64 = 10_000;

/// Multipart overhead allowed on top of a chunk payload
pub const CHUNK_BODY_OVERHEAD: usize = 1024 * 1024;

/// Longest filename kept after sanitization, in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

// =============================================================================
// SESSION LIFETIME
// =============================================================================

/// Inactivity window before a non-terminal session is expired (4 hours)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 4 * 60 * 60;

/// Time a terminal session is kept before its record is purged (15 minutes)
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 15 * 60;

/// Interval between reaper sweeps (5 minutes)
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 5 * 60;

/// Upper bound on a single chunk write to scratch storage
pub const DEFAULT_CHUNK_WRITE_TIMEOUT_SECS: u64 = 30;

/// Upper bound on receiving one chunk request body from the client
pub const DEFAULT_CHUNK_READ_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Content types accepted for claim documents
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/octet-stream",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "text/plain",
];

/// Check if a MIME type is allowed
pub fn is_mime_type_allowed(content_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&content_type)
}
