use std::path::PathBuf;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};

use crate::config::ServerConfig;
use crate::protocol::{encode_frame, PhotoPayload, RealtimeEvent};
use crate::upload::UploadMetadata;

/// frames buffered per room before slow sockets start lagging
const ROOM_CAPACITY: usize = 256;

/// how long a finished upload still answers offset queries
pub const FINISHED_UPLOAD_TTL_SECS: i64 = 60 * 60;

/// a resumable upload, kept around for a while after it finishes
#[derive(Debug, Clone)]
pub struct ResumableUpload {
    pub metadata: UploadMetadata,
    pub total_size: u64,
    /// bytes durably written so far
    pub offset: u64,
    pub temp_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// where the stored file is served from once complete
    pub asset: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// per-event broadcast channels feeding websocket clients
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<String, broadcast::Sender<String>>,
}

impl RoomHub {
    pub fn subscribe(&self, event_id: &str) -> broadcast::Receiver<String> {
        self.rooms
            .entry(event_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, event_id: &str) -> usize {
        self.rooms
            .get(event_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// push an event to everyone in the room; returns how many received it
    pub fn publish(&self, event_id: &str, event: &RealtimeEvent) -> usize {
        let frame = match encode_frame(event_id, event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {} frame: {}", event.kind().as_str(), e);
                return 0;
            }
        };
        let delivered = self
            .rooms
            .get(event_id)
            .and_then(|sender| sender.send(frame).ok())
            .unwrap_or(0);
        tracing::debug!("📣 {} -> room {} ({} socket(s))", event.kind().as_str(), event_id, delivered);
        delivered
    }
}

/// shared application state
pub struct AppState {
    pub files_dir: PathBuf,
    pub config: ServerConfig,
    /// resumable uploads by upload id, including recently finished ones
    pub uploads: DashMap<String, Arc<Mutex<ResumableUpload>>>,
    /// stored photos per event id, newest first
    pub photos: DashMap<String, Vec<PhotoPayload>>,
    pub rooms: RoomHub,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            files_dir: config.files_dir.clone(),
            config,
            uploads: DashMap::new(),
            photos: DashMap::new(),
            rooms: RoomHub::default(),
        }
    }

    /// directory holding partially received uploads
    pub fn partial_dir(&self) -> PathBuf {
        self.files_dir.join(".uploads")
    }

    /// forget finished uploads older than `FINISHED_UPLOAD_TTL_SECS`
    pub fn prune_finished_uploads(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(FINISHED_UPLOAD_TTL_SECS);
        self.uploads.retain(|id, upload| match upload.try_lock() {
            Ok(upload) => {
                let keep = upload.completed_at.map_or(true, |at| at > cutoff);
                if !keep {
                    tracing::debug!("Forgetting finished upload {}", id);
                }
                keep
            }
            // busy means a request is using it right now
            Err(_) => true,
        });
    }

    /// record a stored photo and announce it to the event's room
    pub fn record_photo(&self, event_id: &str, photo: PhotoPayload) {
        self.photos
            .entry(event_id.to_string())
            .or_default()
            .insert(0, photo.clone());
        self.rooms.publish(event_id, &RealtimeEvent::PhotoUploaded(photo));
    }
}
