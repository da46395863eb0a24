//! Client side of the resumable upload pipeline.

pub mod aggregator;
pub mod resume;
pub mod session;
pub mod transport;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::UploadError;

pub use aggregator::{AggregatorObserver, UploadAggregator, UploadItem, UploadStatus};
pub use resume::{Fingerprint, MemoryResumeStore, ResumeStore};
pub use session::{NoopObserver, SessionState, UploadObserver, UploadSession};
pub use transport::{ChunkAck, HttpUploadTransport, UploadTransport};

/// chunking and retry behaviour of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub chunk_size: usize,
    /// one entry is consumed per failed attempt of a step
    pub retry_delays: Vec<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            retry_delays: [0, 1_000, 3_000, 5_000, 10_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

/// a photo or video selected on the device
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub name: String,
    pub content_type: String,
    pub modified: DateTime<Utc>,
    pub data: Bytes,
}

impl MediaFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        modified: DateTime<Utc>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            modified,
            data: data.into(),
        }
    }

    /// read a file from disk, guessing its content type from the extension
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let data = tokio::fs::read(path).await?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        tracing::debug!("Opened {} ({} bytes, {})", name, data.len(), content_type);
        Ok(Self::new(name, content_type, modified, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// where an upload lands once stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub event_id: String,
    pub uploader_id: String,
    pub category_id: Option<String>,
    pub content_type: String,
    pub filename: String,
}

impl UploadMetadata {
    pub fn for_file(file: &MediaFile, event_id: impl Into<String>, uploader_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            uploader_id: uploader_id.into(),
            category_id: None,
            content_type: file.content_type.clone(),
            filename: file.name.clone(),
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// key/value pairs sent alongside upload creation
    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        pairs.insert("filename".to_string(), self.filename.clone());
        pairs.insert("filetype".to_string(), self.content_type.clone());
        pairs.insert("eventId".to_string(), self.event_id.clone());
        pairs.insert("uploaderId".to_string(), self.uploader_id.clone());
        if let Some(category) = &self.category_id {
            pairs.insert("categoryId".to_string(), category.clone());
        }
        pairs
    }

    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            event_id: pairs.get("eventId")?.clone(),
            uploader_id: pairs.get("uploaderId").cloned().unwrap_or_default(),
            category_id: pairs.get("categoryId").cloned().filter(|c| !c.is_empty()),
            content_type: pairs
                .get("filetype")
                .cloned()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            filename: pairs.get("filename")?.clone(),
        })
    }
}
