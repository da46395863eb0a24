//! Folds realtime events into a deduplicated photo list per event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

use crate::protocol::{
    EventKind, GuestbookEntry, InboundEvent, PhotoPayload, PhotoStatus, PhotoUpdate, RealtimeEvent,
};
use crate::realtime::{DistributionManager, Subscription};

/// guestbook photos live in their own id namespace
pub const GUESTBOOK_ID_PREFIX: &str = "guestbook:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoSource {
    /// moderated photo uploaded to the event
    Upload,
    /// picture attached to a guestbook entry
    Guestbook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoEntity {
    pub id: String,
    pub url: String,
    pub status: PhotoStatus,
    pub uploader_id: Option<String>,
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source: PhotoSource,
}

impl From<PhotoPayload> for PhotoEntity {
    fn from(photo: PhotoPayload) -> Self {
        Self {
            id: photo.id,
            url: photo.url,
            status: photo.status,
            uploader_id: photo.uploader_id,
            category_id: photo.category_id,
            created_at: photo.created_at,
            source: PhotoSource::Upload,
        }
    }
}

impl PhotoEntity {
    fn from_guestbook(entry: &GuestbookEntry, photo_url: &str) -> Self {
        Self {
            id: format!("{}{}", GUESTBOOK_ID_PREFIX, entry.id),
            url: photo_url.to_string(),
            status: PhotoStatus::Approved,
            uploader_id: Some(entry.guest_name.clone()),
            category_id: None,
            created_at: entry.created_at,
            source: PhotoSource::Guestbook,
        }
    }

    fn apply(&mut self, update: &PhotoUpdate, default_status: PhotoStatus) {
        self.status = update.status.unwrap_or(default_status);
        if let Some(url) = &update.url {
            self.url = url.clone();
        }
        if let Some(category) = &update.category_id {
            self.category_id = Some(category.clone());
        }
    }
}

/// photo list of one event, newest first
#[derive(Debug, Clone)]
pub struct GalleryReconciler {
    event_id: String,
    photos: Vec<PhotoEntity>,
}

impl GalleryReconciler {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self::with_photos(event_id, Vec::new())
    }

    pub fn with_photos(event_id: impl Into<String>, photos: Vec<PhotoEntity>) -> Self {
        let mut reconciler = Self {
            event_id: event_id.into(),
            photos: Vec::new(),
        };
        reconciler.replace_all(photos);
        reconciler
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// replace the whole list, e.g. after a refetch following a reconnect
    pub fn replace_all(&mut self, photos: Vec<PhotoEntity>) {
        self.photos.clear();
        for photo in photos {
            if !self.contains(&photo.id) {
                self.photos.push(photo);
            }
        }
    }

    pub fn photos(&self) -> &[PhotoEntity] {
        &self.photos
    }

    /// everything moderation has not removed
    pub fn visible(&self) -> Vec<&PhotoEntity> {
        self.photos
            .iter()
            .filter(|photo| photo.status != PhotoStatus::Deleted)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&PhotoEntity> {
        self.photos.iter().find(|photo| photo.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// fold one event into the list; returns whether anything changed
    pub fn apply(&mut self, inbound: &InboundEvent) -> bool {
        if inbound.event_id.as_deref().is_some_and(|id| id != self.event_id) {
            return false;
        }

        match &inbound.event {
            RealtimeEvent::PhotoUploaded(photo) => self.insert_front(PhotoEntity::from(photo.clone())),
            RealtimeEvent::PhotoApproved(update) => self.update(update, PhotoStatus::Approved),
            RealtimeEvent::PhotoRejected(update) => self.update(update, PhotoStatus::Deleted),
            RealtimeEvent::GuestbookEntryAdded(entry) => match &entry.photo_url {
                Some(url) => self.insert_front(PhotoEntity::from_guestbook(entry, url)),
                None => false,
            },
        }
    }

    fn insert_front(&mut self, photo: PhotoEntity) -> bool {
        if self.contains(&photo.id) {
            trace!("Ignoring duplicate photo {}", photo.id);
            return false;
        }
        debug!("New photo {} in event {}", photo.id, self.event_id);
        self.photos.insert(0, photo);
        true
    }

    fn update(&mut self, update: &PhotoUpdate, default_status: PhotoStatus) -> bool {
        // guestbook pictures are never moderated
        let target = self
            .photos
            .iter_mut()
            .find(|photo| photo.source == PhotoSource::Upload && photo.id == update.id);
        match target {
            Some(photo) => {
                photo.apply(update, default_status);
                debug!("Photo {} is now {:?}", photo.id, photo.status);
                true
            }
            None => {
                trace!("Update for unknown photo {}", update.id);
                false
            }
        }
    }
}

/// a mounted gallery viewer: one room membership plus the gallery listeners.
///
/// Dropping the feed detaches it.
pub struct GalleryFeed {
    manager: DistributionManager,
    event_id: String,
    state: Arc<Mutex<GalleryReconciler>>,
    subscriptions: Vec<Subscription>,
    attached: AtomicBool,
}

impl GalleryFeed {
    pub fn attach(manager: &DistributionManager, event_id: &str, seed: Vec<PhotoEntity>) -> Self {
        let state = Arc::new(Mutex::new(GalleryReconciler::with_photos(event_id, seed)));

        let subscriptions = EventKind::ALL
            .iter()
            .map(|kind| {
                let state = state.clone();
                manager.on(*kind, move |event| {
                    state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .apply(event);
                })
            })
            .collect();
        manager.join_event(event_id);

        Self {
            manager: manager.clone(),
            event_id: event_id.to_string(),
            state,
            subscriptions,
            attached: AtomicBool::new(true),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn photos(&self) -> Vec<PhotoEntity> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).photos().to_vec()
    }

    pub fn visible(&self) -> Vec<PhotoEntity> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .visible()
            .into_iter()
            .cloned()
            .collect()
    }

    /// install the result of an external full refetch
    pub fn refetched(&self, photos: Vec<PhotoEntity>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).replace_all(photos);
    }

    /// unsubscribe and leave the room; later calls do nothing
    pub fn detach(&self) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.manager.leave_event(&self.event_id);
    }
}

impl Drop for GalleryFeed {
    fn drop(&mut self) {
        self.detach();
    }
}
