use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::io::SeekFrom;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::models::{
    ErrorResponse, GuestbookRequest, ModerationResponse, PhotoListResponse, UploadResponse,
    UploadStatusResponse,
};
use crate::protocol::{
    decode_metadata, GuestbookEntry, PhotoPayload, PhotoStatus, PhotoUpdate, RealtimeEvent,
    OFFSET_CONTENT_TYPE, UPLOAD_ASSET, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};
use crate::state::{AppState, ResumableUpload};
use crate::upload::UploadMetadata;
use crate::utils::sanitize_filename;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// where a finished upload is stored and served from
fn final_location(state: &AppState, metadata: &UploadMetadata, id: &str) -> (std::path::PathBuf, String) {
    let event_dir = sanitize_filename(&metadata.event_id);
    let name = format!("{}-{}", id, sanitize_filename(&metadata.filename));
    let path = state.files_dir.join(&event_dir).join(&name);
    (path, format!("/files/{}/{}", event_dir, name))
}

fn photo_for(metadata: &UploadMetadata, id: &str, url: String) -> PhotoPayload {
    PhotoPayload {
        id: id.to_string(),
        url,
        status: PhotoStatus::Pending,
        uploader_id: Some(metadata.uploader_id.clone()).filter(|u| !u.is_empty()),
        category_id: metadata.category_id.clone(),
        created_at: chrono::Utc::now(),
    }
}

// health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snapwall",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// whether clients should use the resumable protocol
pub async fn upload_status(State(state): State<Arc<AppState>>) -> Json<UploadStatusResponse> {
    Json(UploadStatusResponse {
        enabled: state.config.resumable_enabled,
    })
}

// create a resumable upload resource
pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !state.config.resumable_enabled {
        return Err(api_error(StatusCode::NOT_FOUND, "Resumable uploads are disabled"));
    }

    let total_size = header_u64(&headers, UPLOAD_LENGTH).ok_or_else(|| {
        tracing::warn!("Upload creation without a valid Upload-Length");
        api_error(StatusCode::BAD_REQUEST, "Missing or invalid Upload-Length")
    })?;

    if total_size > state.config.max_upload_size {
        tracing::warn!("Rejecting {} byte upload (limit {})", total_size, state.config.max_upload_size);
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Upload exceeds {} bytes", state.config.max_upload_size),
        ));
    }

    let pairs = headers
        .get(UPLOAD_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(decode_metadata)
        .unwrap_or_default();
    let metadata = UploadMetadata::from_pairs(&pairs).ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, "Upload-Metadata needs filename and eventId")
    })?;

    if !state.config.accepts_content_type(&metadata.content_type) {
        tracing::warn!("🚫 Disallowed content type {} for {}", metadata.content_type, metadata.filename);
        return Err(api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("Content type not allowed: {}", metadata.content_type),
        ));
    }

    state.prune_finished_uploads();

    let upload_id = Uuid::new_v4().to_string();
    let partial_dir = state.partial_dir();
    fs::create_dir_all(&partial_dir).await.map_err(|e| {
        tracing::error!("Failed to create partial upload directory: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to prepare upload: {}", e))
    })?;
    let temp_path = partial_dir.join(&upload_id);
    fs::File::create(&temp_path).await.map_err(|e| {
        tracing::error!("Failed to create partial file {:?}: {}", temp_path, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to prepare upload: {}", e))
    })?;

    tracing::info!(
        "📤 Created upload {} for {} ({} bytes, event {})",
        upload_id, metadata.filename, total_size, metadata.event_id
    );

    let upload = ResumableUpload {
        metadata,
        total_size,
        offset: 0,
        temp_path,
        created_at: chrono::Utc::now(),
        asset: None,
        completed_at: None,
    };
    state
        .uploads
        .insert(upload_id.clone(), Arc::new(tokio::sync::Mutex::new(upload)));

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION.as_str(), format!("/uploads/{}", upload_id)),
            (UPLOAD_OFFSET, "0".to_string()),
        ],
    )
        .into_response())
}

// report the server-known offset of an upload
pub async fn upload_offset(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Response, ApiError> {
    let upload = state
        .uploads
        .get(&upload_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Upload ID not found"))?;
    let upload = upload.lock().await;
    tracing::trace!("HEAD {} -> {}/{}", upload_id, upload.offset, upload.total_size);

    let mut headers = HeaderMap::new();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(upload.offset));
    headers.insert(UPLOAD_LENGTH, HeaderValue::from(upload.total_size));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(value) = upload.asset.as_deref().and_then(|url| HeaderValue::from_str(url).ok()) {
        headers.insert(UPLOAD_ASSET, value);
    }
    Ok((StatusCode::OK, headers).into_response())
}

/// write a chunk at its offset and cut the file there
async fn write_chunk(path: &FsPath, offset: u64, body: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(body).await?;
    file.set_len(offset + body.len() as u64).await?;
    file.sync_all().await
}

async fn truncate_partial(path: &FsPath, len: u64) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await
}

// append one chunk at the declared offset
pub async fn patch_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != OFFSET_CONTENT_TYPE {
        return Err(api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("Expected Content-Type {}", OFFSET_CONTENT_TYPE),
        ));
    }
    let offset = header_u64(&headers, UPLOAD_OFFSET)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing or invalid Upload-Offset"))?;

    let entry = state
        .uploads
        .get(&upload_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| {
            tracing::warn!("Upload ID not found: {}", upload_id);
            api_error(StatusCode::NOT_FOUND, "Upload ID not found")
        })?;
    let mut upload = entry.lock().await;

    // the final ack may have been lost; answer the resend like the original
    if let Some(asset) = upload.asset.clone() {
        if offset == upload.total_size {
            tracing::debug!("Upload {} already finished, re-acknowledging", upload_id);
            return Ok((
                StatusCode::NO_CONTENT,
                [(UPLOAD_OFFSET, upload.offset.to_string()), (UPLOAD_ASSET, asset)],
            )
                .into_response());
        }
    }

    if offset != upload.offset {
        tracing::debug!("Offset conflict on {}: client {} server {}", upload_id, offset, upload.offset);
        return Ok((
            StatusCode::CONFLICT,
            [(UPLOAD_OFFSET, upload.offset.to_string())],
            Json(ErrorResponse {
                error: format!("Expected offset {}", upload.offset),
            }),
        )
            .into_response());
    }
    if offset + body.len() as u64 > upload.total_size {
        return Err(api_error(StatusCode::BAD_REQUEST, "Chunk runs past Upload-Length"));
    }

    if let Err(e) = write_chunk(&upload.temp_path, upload.offset, &body).await {
        tracing::error!("Failed to write chunk for {}: {}", upload_id, e);
        // partial bytes past the acknowledged offset must not survive a resend
        if let Err(e) = truncate_partial(&upload.temp_path, upload.offset).await {
            tracing::error!("Failed to truncate {} back to {}: {}", upload_id, upload.offset, e);
        }
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to write chunk: {}", e),
        ));
    }

    upload.offset += body.len() as u64;
    tracing::debug!("📦 Upload {} at {}/{} bytes", upload_id, upload.offset, upload.total_size);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(UPLOAD_OFFSET, HeaderValue::from(upload.offset));

    if upload.offset == upload.total_size {
        let url = finish_upload(&state, &upload_id, &mut upload).await?;
        if let Ok(value) = HeaderValue::from_str(&url) {
            response_headers.insert(UPLOAD_ASSET, value);
        }
    }

    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

// move a completed upload into place and announce it
async fn finish_upload(state: &AppState, upload_id: &str, upload: &mut ResumableUpload) -> Result<String, ApiError> {
    let (final_path, url) = final_location(state, &upload.metadata, upload_id);
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            tracing::error!("Failed to create event directory {:?}: {}", parent, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to store upload: {}", e))
        })?;
    }
    fs::rename(&upload.temp_path, &final_path).await.map_err(|e| {
        tracing::error!("Failed to move {:?} to {:?}: {}", upload.temp_path, final_path, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to store upload: {}", e))
    })?;
    upload.asset = Some(url.clone());
    upload.completed_at = Some(chrono::Utc::now());

    tracing::info!("✅ Completed upload {} -> {}", upload_id, url);
    state.record_photo(
        &upload.metadata.event_id,
        photo_for(&upload.metadata, upload_id, url.clone()),
    );
    Ok(url)
}

// upload a whole file via multipart form data
pub async fn direct_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut event_id = None;
    let mut uploader_id = String::new();
    let mut category_id = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Failed to read multipart field: {}", e);
        api_error(StatusCode::BAD_REQUEST, format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    tracing::error!("Failed to read file data for {}: {}", filename, e);
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read file data: {}", e))
                })?;
                file = Some((filename, content_type, data));
            }
            "eventId" | "uploaderId" | "categoryId" => {
                let value = field.text().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read field {}: {}", name, e))
                })?;
                match name.as_str() {
                    "eventId" => event_id = Some(value),
                    "uploaderId" => uploader_id = value,
                    _ => category_id = Some(value).filter(|c| !c.is_empty()),
                }
            }
            other => tracing::trace!("Ignoring multipart field {}", other),
        }
    }

    let event_id = event_id.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No eventId provided"))?;
    let (filename, content_type, data) = file.ok_or_else(|| {
        tracing::warn!("Upload request contained no file field");
        api_error(StatusCode::BAD_REQUEST, "No file provided")
    })?;

    if !state.config.accepts_content_type(&content_type) {
        tracing::warn!("🚫 Disallowed content type {} for {}", content_type, filename);
        return Err(api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("Content type not allowed: {}", content_type),
        ));
    }

    let metadata = UploadMetadata {
        event_id,
        uploader_id,
        category_id,
        content_type,
        filename,
    };
    let id = Uuid::new_v4().to_string();
    let (path, url) = final_location(&state, &metadata, &id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to create directory: {}", e))
        })?;
    }

    let mut out = fs::File::create(&path).await.map_err(|e| {
        tracing::error!("Failed to create file {:?}: {}", path, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to create file: {}", e))
    })?;
    out.write_all(&data).await.map_err(|e| {
        tracing::error!("Failed to write file {:?}: {}", path, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to write file: {}", e))
    })?;
    out.sync_all().await.map_err(|e| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to sync file: {}", e))
    })?;

    let size = data.len() as u64;
    tracing::info!("✅ Uploaded {} ({} bytes) -> {}", metadata.filename, size, url);
    state.record_photo(&metadata.event_id, photo_for(&metadata, &id, url.clone()));

    Ok(Json(UploadResponse { success: true, id, url, size }))
}

// photos of one event, newest first
pub async fn list_event_photos(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Json<PhotoListResponse> {
    let photos = state
        .photos
        .get(&event_id)
        .map(|photos| photos.value().clone())
        .unwrap_or_default();
    tracing::debug!("Listing {} photos for event {}", photos.len(), event_id);
    let total = photos.len();
    Json(PhotoListResponse { photos, total })
}

fn moderate(
    state: &AppState,
    event_id: &str,
    photo_id: &str,
    status: PhotoStatus,
) -> Result<Json<ModerationResponse>, ApiError> {
    let found = state
        .photos
        .get_mut(event_id)
        .and_then(|mut photos| {
            photos.iter_mut().find(|photo| photo.id == photo_id).map(|photo| {
                photo.status = status;
                photo.id.clone()
            })
        })
        .ok_or_else(|| {
            tracing::warn!("Photo {} not found in event {}", photo_id, event_id);
            api_error(StatusCode::NOT_FOUND, format!("Photo not found: {}", photo_id))
        })?;

    let update = PhotoUpdate {
        id: found.clone(),
        status: Some(status),
        ..PhotoUpdate::default()
    };
    let event = match status {
        PhotoStatus::Approved => RealtimeEvent::PhotoApproved(update),
        _ => RealtimeEvent::PhotoRejected(update),
    };
    state.rooms.publish(event_id, &event);
    tracing::info!("🛡️  Photo {} in event {} is now {:?}", found, event_id, status);

    Ok(Json(ModerationResponse { success: true, id: found, status }))
}

pub async fn approve_photo(
    State(state): State<Arc<AppState>>,
    Path((event_id, photo_id)): Path<(String, String)>,
) -> Result<Json<ModerationResponse>, ApiError> {
    moderate(&state, &event_id, &photo_id, PhotoStatus::Approved)
}

pub async fn reject_photo(
    State(state): State<Arc<AppState>>,
    Path((event_id, photo_id)): Path<(String, String)>,
) -> Result<Json<ModerationResponse>, ApiError> {
    moderate(&state, &event_id, &photo_id, PhotoStatus::Deleted)
}

// add a guestbook entry and fan it out
pub async fn add_guestbook_entry(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Json(payload): Json<GuestbookRequest>,
) -> Result<Json<GuestbookEntry>, ApiError> {
    if payload.guest_name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "guestName is required"));
    }
    let entry = GuestbookEntry {
        id: Uuid::new_v4().to_string(),
        guest_name: payload.guest_name.trim().to_string(),
        message: payload.message,
        photo_url: payload.photo_url.filter(|url| !url.is_empty()),
        created_at: chrono::Utc::now(),
    };
    state
        .rooms
        .publish(&event_id, &RealtimeEvent::GuestbookEntryAdded(entry.clone()));
    tracing::info!("📝 Guestbook entry {} from {} in event {}", entry.id, entry.guest_name, event_id);
    Ok(Json(entry))
}
