use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::retry::{retry_with_backoff, RetryPolicy};
use crate::features::uploads::dtos::{
    CancelUploadResponseDto, ChunkUploadResponseDto, FinalizeUploadDto,
    FinalizeUploadResponseDto, InitUploadDto, InitUploadResponseDto, UploadStatusResponseDto,
};
use crate::features::uploads::models::UploadStatus;
use crate::shared::types::ApiResponse;

/// Chunks in flight at once during `upload_bytes`
const DEFAULT_PARALLELISM: usize = 3;

/// Per-request timeout, covering one chunk transfer
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ClientError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    /// Every other 4xx means the request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            ClientError::InvalidResponse(_) | ClientError::InvalidInput(_) => false,
        }
    }
}

/// HTTP client for the chunked upload API
#[derive(Debug, Clone)]
pub struct UploadClient {
    endpoint: Url,
    http: HttpClient,
    retry: RetryPolicy,
    parallelism: usize,
    chunk_size: Option<u64>,
}

impl UploadClient {
    /// `endpoint` is the server base URL, e.g. `http://localhost:3000`
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        let mut base = endpoint.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base).map_err(|e| {
            ClientError::InvalidInput(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;

        let http = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            endpoint,
            http,
            retry: RetryPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            chunk_size: None,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Ask the server for a specific chunk size instead of its default
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.endpoint
            .join(path)
            .map_err(|e| ClientError::InvalidInput(format!("invalid path '{}': {}", path, e)))
    }

    /// Open a session. Not retried: every call creates a new session.
    pub async fn initialize(
        &self,
        request: &InitUploadDto,
    ) -> Result<InitUploadResponseDto, ClientError> {
        let res = self
            .http
            .post(self.url("api/uploads/init")?)
            .json(request)
            .send()
            .await?;
        read_envelope(res).await
    }

    /// Send one chunk, single attempt
    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        index: u32,
        start: u64,
        end: u64,
        payload: Bytes,
    ) -> Result<ChunkUploadResponseDto, ClientError> {
        let form = Form::new()
            .text("uploadId", upload_id.to_string())
            .text("chunkIndex", index.to_string())
            .text("start", start.to_string())
            .text("end", end.to_string())
            .part(
                "chunk",
                Part::bytes(payload.to_vec())
                    .file_name(format!("chunk-{:06}", index))
                    .mime_str("application/octet-stream")?,
            );

        let res = self
            .http
            .post(self.url("api/uploads/chunk")?)
            .multipart(form)
            .send()
            .await?;
        read_envelope(res).await
    }

    /// Send one chunk, retrying transient failures per the retry policy
    pub async fn upload_chunk_with_retry(
        &self,
        upload_id: Uuid,
        index: u32,
        start: u64,
        end: u64,
        payload: Bytes,
    ) -> Result<ChunkUploadResponseDto, ClientError> {
        retry_with_backoff(&self.retry, move |attempt| {
            let payload = payload.clone();
            async move {
                if attempt > 1 {
                    debug!(upload_id = %upload_id, index, attempt, "Re-sending chunk");
                }
                self.upload_chunk(upload_id, index, start, end, payload).await
            }
        })
        .await
    }

    /// Assemble the upload. Safe to retry: a failed attempt leaves the
    /// session `in_progress`, a completed one rejects the repeat.
    pub async fn finalize(
        &self,
        upload_id: Uuid,
        filename: Option<&str>,
    ) -> Result<FinalizeUploadResponseDto, ClientError> {
        let request = FinalizeUploadDto {
            upload_id,
            filename: filename.map(str::to_string),
        };

        let url = self.url("api/uploads/finalize")?;
        let request = &request;

        retry_with_backoff(&self.retry, move |_| {
            let url = url.clone();
            async move {
                let res = self.http.post(url).json(request).send().await?;
                read_envelope(res).await
            }
        })
        .await
    }

    pub async fn cancel(&self, upload_id: Uuid) -> Result<CancelUploadResponseDto, ClientError> {
        let url = self.url(&format!("api/uploads/{}", upload_id))?;
        retry_with_backoff(&self.retry, move |_| {
            let url = url.clone();
            async move {
                let res = self.http.delete(url).send().await?;
                read_envelope(res).await
            }
        })
        .await
    }

    pub async fn status(&self, upload_id: Uuid) -> Result<UploadStatusResponseDto, ClientError> {
        let url = self.url(&format!("api/uploads/{}", upload_id))?;
        retry_with_backoff(&self.retry, move |_| {
            let url = url.clone();
            async move {
                let res = self.http.get(url).send().await?;
                read_envelope(res).await
            }
        })
        .await
    }

    /// Upload a whole file: initialize, send every chunk, finalize
    pub async fn upload_bytes(
        &self,
        filename: &str,
        mime_type: &str,
        data: Bytes,
        report_id: Option<Uuid>,
    ) -> Result<FinalizeUploadResponseDto, ClientError> {
        let session = self
            .initialize(&InitUploadDto {
                filename: filename.to_string(),
                file_size: data.len() as u64,
                mime_type: mime_type.to_string(),
                report_id,
                chunk_size: self.chunk_size,
            })
            .await?;

        info!(
            upload_id = %session.upload_id,
            total_chunks = session.total_chunks,
            chunk_size = session.chunk_size,
            "Upload session opened"
        );

        let indices = (0..session.total_chunks).collect();
        self.send_chunks(session.upload_id, session.chunk_size, &data, indices)
            .await?;
        self.finalize(session.upload_id, None).await
    }

    /// Continue an interrupted upload, sending only the chunks the server
    /// does not have yet
    pub async fn resume_bytes(
        &self,
        upload_id: Uuid,
        data: Bytes,
    ) -> Result<FinalizeUploadResponseDto, ClientError> {
        let status = self.status(upload_id).await?;

        if status.file_size != data.len() as u64 {
            return Err(ClientError::InvalidInput(format!(
                "file has {} bytes but upload {} expects {}",
                data.len(),
                upload_id,
                status.file_size
            )));
        }
        if !matches!(status.status, UploadStatus::Initialized | UploadStatus::InProgress) {
            return Err(ClientError::InvalidInput(format!(
                "upload {} is {} and cannot be resumed",
                upload_id, status.status
            )));
        }

        info!(
            upload_id = %upload_id,
            missing = status.missing_chunks.len(),
            total_chunks = status.total_chunks,
            "Resuming upload"
        );

        self.send_chunks(upload_id, status.chunk_size, &data, status.missing_chunks)
            .await?;
        self.finalize(upload_id, None).await
    }

    async fn send_chunks(
        &self,
        upload_id: Uuid,
        chunk_size: u64,
        data: &Bytes,
        indices: Vec<u32>,
    ) -> Result<(), ClientError> {
        let total = data.len() as u64;
        if chunk_size == 0 {
            return Err(ClientError::InvalidResponse("server returned chunk size 0".to_string()));
        }

        let mut chunks = Vec::with_capacity(indices.len());
        for index in indices {
            let start = index as u64 * chunk_size;
            if start >= total {
                return Err(ClientError::InvalidResponse(format!(
                    "chunk {} starts beyond the end of the file",
                    index
                )));
            }
            let end = (start + chunk_size).min(total);
            chunks.push((index, start, end, data.slice(start as usize..end as usize)));
        }

        stream::iter(chunks)
            .map(|(index, start, end, payload)| {
                self.upload_chunk_with_retry(upload_id, index, start, end, payload)
            })
            .buffer_unordered(self.parallelism)
            .try_for_each(|receipt| async move {
                debug!(
                    upload_id = %receipt.upload_id,
                    index = receipt.chunk_index,
                    received = receipt.received_chunks,
                    total = receipt.total_chunks,
                    "Chunk acknowledged"
                );
                Ok(())
            })
            .await
    }
}

/// Unwrap a success envelope, or turn an error envelope into `ClientError::Api`
async fn read_envelope<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    let status = res.status();
    let body = res.bytes().await?;

    if status.is_success() {
        let envelope: ApiResponse<T> = serde_json::from_slice(&body)
            .map_err(|e| ClientError::InvalidResponse(format!("malformed response body: {}", e)))?;
        return envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("response carries no data".to_string()));
    }

    let (code, message) = match serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body) {
        Ok(envelope) => (
            envelope.code.unwrap_or_default(),
            envelope.message.unwrap_or_default(),
        ),
        Err(_) => (String::new(), String::from_utf8_lossy(&body).into_owned()),
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
