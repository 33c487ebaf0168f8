use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::shared::constants::{
    DEFAULT_CHUNK_READ_TIMEOUT_SECS, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_WRITE_TIMEOUT_SECS,
    DEFAULT_CLEANUP_GRACE_SECS, DEFAULT_REAPER_INTERVAL_SECS, DEFAULT_SESSION_TTL_SECS,
    MAX_CHUNK_SIZE, MAX_FILE_SIZE, MAX_TOTAL_CHUNKS, MIN_CHUNK_SIZE,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: Option<DatabaseConfig>,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

/// Limits and lifetimes of the chunked upload engine
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Chunk size handed out when the client does not ask for one
    pub default_chunk_size: u64,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    /// Largest declared file size accepted at initialize
    pub max_file_size: u64,
    pub max_total_chunks: u64,
    /// Root for chunk scratch space, staging files and local artifacts
    pub scratch_dir: PathBuf,
    /// Inactivity after which a non-terminal session is expired
    pub session_ttl: Duration,
    /// Time a terminal session is kept before it is purged
    pub cleanup_grace: Duration,
    pub reaper_interval: Duration,
    pub chunk_write_timeout: Duration,
    /// Time allowed for a client to deliver one chunk request body
    pub chunk_read_timeout: Duration,
}

/// Which backend holds chunk scratch data and assembled files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    /// Chunks held in process memory, assembled files on local disk
    Memory,
    MinIO,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub minio: MinIOConfig,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub title: String,
    pub version: String,
    pub description: String,
}

/// MinIO/S3 storage configuration for chunk and artifact objects
#[derive(Debug, Clone)]
pub struct MinIOConfig {
    /// MinIO/S3 endpoint URL
    pub endpoint: String,
    /// Public endpoint URL used in artifact locations (defaults to endpoint)
    pub public_endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// AWS region (for S3 compatibility)
    pub region: String,
    /// Key prefix for in-flight chunks
    pub chunk_prefix: String,
    /// Key prefix for assembled files
    pub artifact_prefix: String,
}

/// Read a numeric variable, falling back to `default` when unset
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if exists, ignore if not found (optional for production)
        if let Err(e) = dotenvy::dotenv() {
            if !e.to_string().contains("not found") {
                eprintln!("Warning: Error loading .env file: {}", e);
            }
        }

        Ok(Config {
            app: AppConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            upload: UploadConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            swagger: SwaggerConfig::from_env()?,
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid PORT: {}", e))?;

        // Parse CORS allowed origins from comma-separated string
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            cors_allowed_origins,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    // Default values for database connection pool (conservative defaults for small-medium apps)
    const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    const DEFAULT_MIN_CONNECTIONS: u32 = 1;
    const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
    const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600; // 10 minutes
    const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800; // 30 minutes

    /// `None` when `DATABASE_URL` is unset; sessions then live in memory
    pub fn from_env() -> Result<Option<Self>, String> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };

        Ok(Some(Self {
            url,
            max_connections: parse_env("DB_MAX_CONNECTIONS", Self::DEFAULT_MAX_CONNECTIONS)?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", Self::DEFAULT_MIN_CONNECTIONS)?,
            acquire_timeout_secs: parse_env(
                "DB_ACQUIRE_TIMEOUT_SECS",
                Self::DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: parse_env("DB_IDLE_TIMEOUT_SECS", Self::DEFAULT_IDLE_TIMEOUT_SECS)?,
            max_lifetime_secs: parse_env("DB_MAX_LIFETIME_SECS", Self::DEFAULT_MAX_LIFETIME_SECS)?,
        }))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_file_size: MAX_FILE_SIZE,
            max_total_chunks: MAX_TOTAL_CHUNKS,
            scratch_dir: PathBuf::from("./data/uploads"),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            cleanup_grace: Duration::from_secs(DEFAULT_CLEANUP_GRACE_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            chunk_write_timeout: Duration::from_secs(DEFAULT_CHUNK_WRITE_TIMEOUT_SECS),
            chunk_read_timeout: Duration::from_secs(DEFAULT_CHUNK_READ_TIMEOUT_SECS),
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let config = Self {
            default_chunk_size: parse_env(
                "UPLOAD_DEFAULT_CHUNK_SIZE",
                defaults.default_chunk_size,
            )?,
            min_chunk_size: parse_env("UPLOAD_MIN_CHUNK_SIZE", defaults.min_chunk_size)?,
            max_chunk_size: parse_env("UPLOAD_MAX_CHUNK_SIZE", defaults.max_chunk_size)?,
            max_file_size: parse_env("UPLOAD_MAX_FILE_SIZE", defaults.max_file_size)?,
            max_total_chunks: parse_env("UPLOAD_MAX_TOTAL_CHUNKS", defaults.max_total_chunks)?,
            scratch_dir: env::var("UPLOAD_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            session_ttl: Duration::from_secs(parse_env(
                "UPLOAD_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )?),
            cleanup_grace: Duration::from_secs(parse_env(
                "UPLOAD_CLEANUP_GRACE_SECS",
                DEFAULT_CLEANUP_GRACE_SECS,
            )?),
            reaper_interval: Duration::from_secs(parse_env(
                "UPLOAD_REAPER_INTERVAL_SECS",
                DEFAULT_REAPER_INTERVAL_SECS,
            )?),
            chunk_write_timeout: Duration::from_secs(parse_env(
                "UPLOAD_CHUNK_WRITE_TIMEOUT_SECS",
                DEFAULT_CHUNK_WRITE_TIMEOUT_SECS,
            )?),
            chunk_read_timeout: Duration::from_secs(parse_env(
                "UPLOAD_CHUNK_READ_TIMEOUT_SECS",
                DEFAULT_CHUNK_READ_TIMEOUT_SECS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_chunk_size == 0 {
            return Err("UPLOAD_MIN_CHUNK_SIZE must be greater than zero".to_string());
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err("UPLOAD_MIN_CHUNK_SIZE must not exceed UPLOAD_MAX_CHUNK_SIZE".to_string());
        }
        if !(self.min_chunk_size..=self.max_chunk_size).contains(&self.default_chunk_size) {
            return Err(
                "UPLOAD_DEFAULT_CHUNK_SIZE must lie between the minimum and maximum chunk size"
                    .to_string(),
            );
        }
        if self.max_total_chunks == 0 || self.max_total_chunks > u64::from(u32::MAX) {
            return Err(format!(
                "UPLOAD_MAX_TOTAL_CHUNKS must be between 1 and {}",
                u32::MAX
            ));
        }
        if self.reaper_interval.is_zero() {
            return Err("UPLOAD_REAPER_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.chunk_write_timeout.is_zero() || self.chunk_read_timeout.is_zero() {
            return Err("Chunk read and write timeouts must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.scratch_dir.join("chunks")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.scratch_dir.join("staging")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.scratch_dir.join("files")
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, String> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "memory" => StorageBackend::Memory,
            "minio" | "s3" => StorageBackend::MinIO,
            other => {
                return Err(format!(
                    "STORAGE_BACKEND must be 'local', 'memory' or 'minio', got '{}'",
                    other
                ))
            }
        };

        Ok(Self {
            backend,
            minio: MinIOConfig::from_env()?,
        })
    }
}

impl SwaggerConfig {
    pub fn from_env() -> Result<Self, String> {
        // Only use credentials if they are non-empty
        let username = env::var("SWAGGER_USERNAME").ok().filter(|s| !s.is_empty());
        let password = env::var("SWAGGER_PASSWORD").ok().filter(|s| !s.is_empty());
        let title = env::var("SWAGGER_TITLE").unwrap_or_else(|_| "Claimdoc API".to_string());
        let version = env::var("SWAGGER_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
        let description = env::var("SWAGGER_DESCRIPTION")
            .unwrap_or_else(|_| "Resumable claim document uploads".to_string());

        Ok(Self {
            username,
            password,
            title,
            version,
            description,
        })
    }

    /// Returns credentials in "username:password" format if auth is enabled
    pub fn credentials(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(format!("{}:{}", user, pass)),
            _ => None,
        }
    }
}

impl MinIOConfig {
    pub fn from_env() -> Result<Self, String> {
        let endpoint =
            env::var("MINIO_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".to_string());

        // Public endpoint defaults to the main endpoint if not specified
        let public_endpoint =
            env::var("MINIO_PUBLIC_ENDPOINT").unwrap_or_else(|_| endpoint.clone());

        let access_key = env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string());

        let secret_key = env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string());

        let bucket = env::var("MINIO_BUCKET").unwrap_or_else(|_| "claimdoc-uploads".to_string());

        let region = env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string());

        let chunk_prefix = env::var("MINIO_CHUNK_PREFIX").unwrap_or_else(|_| "chunks".to_string());

        let artifact_prefix =
            env::var("MINIO_ARTIFACT_PREFIX").unwrap_or_else(|_| "documents".to_string());

        Ok(Self {
            endpoint,
            public_endpoint,
            access_key,
            secret_key,
            bucket,
            region,
            chunk_prefix,
            artifact_prefix,
        })
    }
}
