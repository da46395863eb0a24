//! Wire formats shared by the client and the reference server.
//!
//! Two protocols cross the network boundary: the resumable upload headers
//! (`Upload-*`) and the realtime JSON frames exchanged over the websocket.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UPLOAD_LENGTH: &str = "Upload-Length";
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const UPLOAD_METADATA: &str = "Upload-Metadata";
pub const UPLOAD_ASSET: &str = "Upload-Asset";
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// encode metadata as `key base64(value)` pairs separated by commas
pub fn encode_metadata(pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{} {}", key, STANDARD.encode(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

/// decode an `Upload-Metadata` header, skipping malformed pairs
pub fn decode_metadata(header: &str) -> BTreeMap<String, String> {
    header
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, ' ');
            let key = parts.next().filter(|k| !k.is_empty())?;
            let value = match parts.next() {
                Some(encoded) => String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?,
                None => String::new(),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

/// outbound control messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    JoinRoom {
        #[serde(rename = "eventId")]
        event_id: String,
    },
    LeaveRoom {
        #[serde(rename = "eventId")]
        event_id: String,
    },
}

impl ControlMessage {
    pub fn join(event_id: impl Into<String>) -> Self {
        ControlMessage::JoinRoom { event_id: event_id.into() }
    }

    pub fn leave(event_id: impl Into<String>) -> Self {
        ControlMessage::LeaveRoom { event_id: event_id.into() }
    }
}

/// discriminator of inbound realtime events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PhotoUploaded,
    PhotoApproved,
    PhotoRejected,
    GuestbookEntryAdded,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::PhotoUploaded,
        EventKind::PhotoApproved,
        EventKind::PhotoRejected,
        EventKind::GuestbookEntryAdded,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "photo_uploaded" => Some(EventKind::PhotoUploaded),
            "photo_approved" => Some(EventKind::PhotoApproved),
            "photo_rejected" => Some(EventKind::PhotoRejected),
            "guestbook_entry_added" => Some(EventKind::GuestbookEntryAdded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PhotoUploaded => "photo_uploaded",
            EventKind::PhotoApproved => "photo_approved",
            EventKind::PhotoRejected => "photo_rejected",
            EventKind::GuestbookEntryAdded => "guestbook_entry_added",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Pending,
    Approved,
    #[serde(alias = "rejected")]
    Deleted,
}

/// canonical photo as announced by `photo_uploaded`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPayload {
    pub id: String,
    pub url: String,
    pub status: PhotoStatus,
    #[serde(default)]
    pub uploader_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// partial update carried by `photo_approved` / `photo_rejected`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PhotoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestbookEntry {
    pub id: String,
    pub guest_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    PhotoUploaded(PhotoPayload),
    PhotoApproved(PhotoUpdate),
    PhotoRejected(PhotoUpdate),
    GuestbookEntryAdded(GuestbookEntry),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::PhotoUploaded(_) => EventKind::PhotoUploaded,
            RealtimeEvent::PhotoApproved(_) => EventKind::PhotoApproved,
            RealtimeEvent::PhotoRejected(_) => EventKind::PhotoRejected,
            RealtimeEvent::GuestbookEntryAdded(_) => EventKind::GuestbookEntryAdded,
        }
    }
}

/// one decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event_id: Option<String>,
    pub event: RealtimeEvent,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "eventId", default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// decode one inbound frame; unknown discriminators yield `Ok(None)`
pub fn decode_frame(text: &str) -> Result<Option<InboundEvent>, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let Some(kind) = EventKind::from_tag(&envelope.kind) else {
        return Ok(None);
    };

    let event = match kind {
        EventKind::PhotoUploaded => RealtimeEvent::PhotoUploaded(serde_json::from_value(envelope.payload)?),
        EventKind::PhotoApproved => RealtimeEvent::PhotoApproved(serde_json::from_value(envelope.payload)?),
        EventKind::PhotoRejected => RealtimeEvent::PhotoRejected(serde_json::from_value(envelope.payload)?),
        EventKind::GuestbookEntryAdded => {
            RealtimeEvent::GuestbookEntryAdded(serde_json::from_value(envelope.payload)?)
        }
    };

    Ok(Some(InboundEvent { event_id: envelope.event_id, event }))
}

/// encode an event for delivery into a room
pub fn encode_frame(event_id: &str, event: &RealtimeEvent) -> Result<String, serde_json::Error> {
    let payload = match event {
        RealtimeEvent::PhotoUploaded(p) => serde_json::to_value(p)?,
        RealtimeEvent::PhotoApproved(u) | RealtimeEvent::PhotoRejected(u) => serde_json::to_value(u)?,
        RealtimeEvent::GuestbookEntryAdded(g) => serde_json::to_value(g)?,
    };
    serde_json::to_string(&Envelope {
        kind: event.kind().as_str().to_string(),
        event_id: Some(event_id.to_string()),
        payload,
    })
}
