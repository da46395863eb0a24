use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::session::UploadObserver;
use crate::error::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

impl UploadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }
}

/// ui-facing projection of one upload session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadItem {
    pub id: String,
    pub filename: String,
    pub progress: u8,
    pub status: UploadStatus,
    pub error: Option<String>,
}

/// tracks every running upload and derives overall progress.
///
/// All mutations go through one lock, so `is_uploading` always agrees with
/// the item statuses no matter how callbacks from different sessions
/// interleave.
#[derive(Debug, Default)]
pub struct UploadAggregator {
    items: Mutex<Vec<UploadItem>>,
}

impl UploadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, Vec<UploadItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// append a pending item; an existing id is reset in place
    pub fn add_upload(&self, id: impl Into<String>, filename: impl Into<String>) {
        let id = id.into();
        let item = UploadItem {
            id: id.clone(),
            filename: filename.into(),
            progress: 0,
            status: UploadStatus::Pending,
            error: None,
        };
        let mut items = self.items();
        match items.iter().position(|existing| existing.id == id) {
            Some(index) => items[index] = item,
            None => items.push(item),
        }
    }

    pub fn update_progress(&self, id: &str, progress: u8) {
        let mut items = self.items();
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = UploadStatus::Uploading;
            item.progress = progress.min(100);
        }
    }

    pub fn set_status(&self, id: &str, status: UploadStatus, error: Option<String>) {
        let mut items = self.items();
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = status;
            item.error = error;
            if status == UploadStatus::Success {
                item.progress = 100;
            }
        }
    }

    pub fn remove(&self, id: &str) {
        self.items().retain(|item| item.id != id);
    }

    /// drop finished items; failed ones stay visible for a manual retry
    pub fn clear_completed(&self) {
        self.items().retain(|item| item.status != UploadStatus::Success);
    }

    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.items().clone()
    }

    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.items().iter().find(|item| item.id == id).cloned()
    }

    pub fn is_uploading(&self) -> bool {
        self.items().iter().any(|item| item.status.is_active())
    }

    /// mean progress over pending/uploading items, 100 when none remain
    pub fn aggregate_progress(&self) -> u8 {
        let items = self.items();
        let active: Vec<_> = items.iter().filter(|item| item.status.is_active()).collect();
        if active.is_empty() {
            return 100;
        }
        let sum: u32 = active.iter().map(|item| item.progress as u32).sum();
        (sum / active.len() as u32) as u8
    }
}

/// feeds one session's callbacks into an aggregator item
pub struct AggregatorObserver {
    aggregator: Arc<UploadAggregator>,
    id: String,
}

impl AggregatorObserver {
    /// registers the item and returns the observer for its session
    pub fn register(aggregator: Arc<UploadAggregator>, id: impl Into<String>, filename: impl Into<String>) -> Self {
        let id = id.into();
        aggregator.add_upload(id.clone(), filename);
        Self { aggregator, id }
    }
}

impl UploadObserver for AggregatorObserver {
    fn on_progress(&self, percent: u8) {
        self.aggregator.update_progress(&self.id, percent);
    }

    fn on_success(&self, _asset: &str) {
        self.aggregator.set_status(&self.id, UploadStatus::Success, None);
    }

    fn on_error(&self, error: &UploadError) {
        self.aggregator
            .set_status(&self.id, UploadStatus::Error, Some(error.to_string()));
    }
}
