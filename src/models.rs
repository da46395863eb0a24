use serde::{Deserialize, Serialize};

use crate::protocol::{PhotoPayload, PhotoStatus};

// response for the resumable upload status probe
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadStatusResponse {
    pub enabled: bool,
}

// response for a single request (non-resumable) upload
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    pub id: String,
    pub url: String,
    pub size: u64,
}

// initial gallery fetch for one event
#[derive(Serialize, Deserialize, Debug)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoPayload>,
    pub total: usize,
}

// result of approving or rejecting a photo
#[derive(Serialize, Deserialize, Debug)]
pub struct ModerationResponse {
    pub success: bool,
    pub id: String,
    pub status: PhotoStatus,
}

// new guestbook entry, optionally with an attached photo
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GuestbookRequest {
    pub guest_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

// generic error response
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
