use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use super::UploadMetadata;
use crate::error::UploadError;
use crate::protocol::{
    encode_metadata, OFFSET_CONTENT_TYPE, UPLOAD_ASSET, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};

/// what the server holds of an upload, from a chunk ack or an offset query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    /// server-known offset
    pub offset: u64,
    /// present once the final byte was stored
    pub asset: Option<String>,
}

impl ChunkAck {
    /// the stored asset, if all `total` bytes have landed
    pub fn finished(&self, total: u64) -> Option<&str> {
        self.asset.as_deref().filter(|_| self.offset >= total)
    }
}

/// the network operations an upload session suspends on
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// status probe; anything but a clear "enabled" counts as disabled
    async fn resumable_enabled(&self) -> bool;

    /// create the per-file resource and return its location
    async fn create(&self, metadata: &UploadMetadata, total: u64) -> Result<String, UploadError>;

    /// current server-known offset of an upload, with its asset once finished
    async fn offset(&self, location: &str) -> Result<ChunkAck, UploadError>;

    async fn send_chunk(&self, location: &str, offset: u64, chunk: Bytes) -> Result<ChunkAck, UploadError>;

    /// single request upload used when the resumable protocol is off
    async fn upload_direct(&self, metadata: &UploadMetadata, data: Bytes) -> Result<String, UploadError>;
}

/// `UploadTransport` over HTTP against the snapwall server
#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    enabled: bool,
}

#[derive(Deserialize)]
struct DirectUploadResponse {
    url: String,
}

impl HttpUploadTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

/// map a non-success status onto the error taxonomy
async fn status_error(response: reqwest::Response) -> UploadError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        UploadError::Network(format!("{}: {}", status, message))
    } else {
        UploadError::Rejected { status: status.as_u16(), message }
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn ack_from(response: &reqwest::Response) -> Result<ChunkAck, UploadError> {
    let offset = header_u64(response, UPLOAD_OFFSET)
        .ok_or_else(|| UploadError::InvalidResponse("missing Upload-Offset header".to_string()))?;
    let asset = response
        .headers()
        .get(UPLOAD_ASSET)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok(ChunkAck { offset, asset })
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn resumable_enabled(&self) -> bool {
        let url = format!("{}/uploads/status", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Status probe returned {}, treating resumable uploads as disabled", response.status());
                return false;
            }
            Err(e) => {
                debug!("Status probe failed: {}", e);
                return false;
            }
        };
        response
            .json::<StatusResponse>()
            .await
            .map(|s| s.enabled)
            .unwrap_or(false)
    }

    #[instrument(skip(self, metadata), fields(filename = %metadata.filename))]
    async fn create(&self, metadata: &UploadMetadata, total: u64) -> Result<String, UploadError> {
        let response = self
            .http
            .post(format!("{}/uploads", self.base_url))
            .header(UPLOAD_LENGTH, total)
            .header(UPLOAD_METADATA, encode_metadata(&metadata.to_pairs()))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UploadError::InvalidResponse("missing Location header".to_string()))?;
        debug!("Created upload at {}", location);
        Ok(self.resolve(location))
    }

    async fn offset(&self, location: &str) -> Result<ChunkAck, UploadError> {
        let response = self.http.head(self.resolve(location)).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        ack_from(&response)
    }

    async fn send_chunk(&self, location: &str, offset: u64, chunk: Bytes) -> Result<ChunkAck, UploadError> {
        trace!("PATCH {} at offset {} ({} bytes)", location, offset, chunk.len());
        let response = self
            .http
            .patch(self.resolve(location))
            .header(UPLOAD_OFFSET, offset)
            .header(reqwest::header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(UploadError::OffsetConflict {
                server_offset: header_u64(&response, UPLOAD_OFFSET),
            });
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        ack_from(&response)
    }

    #[instrument(skip(self, metadata, data), fields(filename = %metadata.filename))]
    async fn upload_direct(&self, metadata: &UploadMetadata, data: Bytes) -> Result<String, UploadError> {
        let part = reqwest::multipart::Part::stream(reqwest::Body::from(data))
            .file_name(metadata.filename.clone())
            .mime_str(&metadata.content_type)?;
        let mut form = reqwest::multipart::Form::new()
            .text("eventId", metadata.event_id.clone())
            .text("uploaderId", metadata.uploader_id.clone());
        if let Some(category) = &metadata.category_id {
            form = form.text("categoryId", category.clone());
        }
        let form = form.part("file", part);

        let response = self
            .http
            .post(format!("{}/uploads/direct", self.base_url))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: DirectUploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        Ok(body.url)
    }
}
