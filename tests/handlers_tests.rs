use snapwall::config::ServerConfig;
use snapwall::handlers::health_check;
use snapwall::models::{ModerationResponse, PhotoListResponse, UploadResponse, UploadStatusResponse};
use snapwall::protocol::{
    decode_frame, encode_metadata, GuestbookEntry, PhotoStatus, RealtimeEvent, OFFSET_CONTENT_TYPE,
};
use snapwall::server::build_router;
use snapwall::state::{AppState, FINISHED_UPLOAD_TTL_SECS};
use snapwall::upload::UploadMetadata;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::util::ServiceExt;

const API_KEY: &str = "moderator-key";

fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        files_dir: dir.to_path_buf(),
        host: "127.0.0.1".to_string(),
        port: 0,
        max_upload_size: 1024 * 1024,
        worker_threads: 1,
        api_key_hash: ServerConfig::hash_api_key(API_KEY),
        resumable_enabled: true,
        allowed_content_types: vec!["image/*".to_string(), "video/*".to_string()],
        cors_origins: vec!["http://localhost:3000".to_string()],
    }
}

fn setup(config: ServerConfig) -> (Arc<AppState>, Router) {
    let state = Arc::new(AppState::new(config));
    let app = build_router(state.clone());
    (state, app)
}

async fn send(app: &Router, mut request: Request<Body>) -> Response {
    // the rate limiter keys on the peer address
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000))));
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn metadata_header(filename: &str, content_type: &str) -> String {
    let metadata = UploadMetadata {
        event_id: "evt-1".to_string(),
        uploader_id: "guest-1".to_string(),
        category_id: None,
        content_type: content_type.to_string(),
        filename: filename.to_string(),
    };
    encode_metadata(&metadata.to_pairs())
}

fn create_request(length: u64, metadata: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/uploads")
        .header("Upload-Length", length.to_string())
        .header("Upload-Metadata", metadata)
        .body(Body::empty())
        .unwrap()
}

fn patch_request(location: &str, offset: u64, chunk: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(location)
        .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
        .header("Upload-Offset", offset.to_string())
        .body(Body::from(chunk))
        .unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

fn multipart_body(boundary: &str, filename: &str, content_type: &str, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"eventId\"\r\n\r\nevt-1\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"uploaderId\"\r\n\r\nguest-1\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {t}\r\n\r\n{d}\r\n\
         --{b}--\r\n",
        b = boundary,
        f = filename,
        t = content_type,
        d = data,
    )
}

async fn upload_photo(app: &Router) -> String {
    let response = send(app, create_request(4, &metadata_header("cake.jpg", "image/jpeg"))).await;
    let location = header_str(&response, "location").to_string();
    let response = send(app, patch_request(&location, 0, b"cake")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    location.trim_start_matches("/uploads/").to_string()
}

#[tokio::test]
async fn test_health_check() {
    let response = health_check().await;
    assert_eq!(response.0["status"], "healthy");
}

#[tokio::test]
async fn test_upload_status_reflects_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, app) = setup(test_config(temp_dir.path()));
    let request = Request::builder().uri("/uploads/status").body(Body::empty()).unwrap();
    let status: UploadStatusResponse = body_json(send(&app, request).await).await;
    assert!(status.enabled);

    let mut config = test_config(temp_dir.path());
    config.resumable_enabled = false;
    let (_, app) = setup(config);
    let request = Request::builder().uri("/uploads/status").body(Body::empty()).unwrap();
    let status: UploadStatusResponse = body_json(send(&app, request).await).await;
    assert!(!status.enabled);

    let response = send(&app, create_request(4, &metadata_header("cake.jpg", "image/jpeg"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resumable_upload_flow() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let mut room = state.rooms.subscribe("evt-1");

    let response = send(&app, create_request(10, &metadata_header("party.jpg", "image/jpeg"))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "x-content-type-options"), "nosniff");
    let location = header_str(&response, "location").to_string();
    assert!(location.starts_with("/uploads/"));
    assert_eq!(state.uploads.len(), 1);

    let head = Request::builder().method("HEAD").uri(&location).body(Body::empty()).unwrap();
    let response = send(&app, head).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "upload-offset"), "0");
    assert_eq!(header_str(&response, "upload-length"), "10");

    let response = send(&app, patch_request(&location, 0, b"hello")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "upload-offset"), "5");
    assert!(response.headers().get("upload-asset").is_none());

    // a resend of the first chunk is refused with the server offset
    let response = send(&app, patch_request(&location, 0, b"hello")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(header_str(&response, "upload-offset"), "5");

    let response = send(&app, patch_request(&location, 5, b"world")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "upload-offset"), "10");
    let asset = header_str(&response, "upload-asset").to_string();
    assert!(asset.starts_with("/files/evt-1/"));
    assert!(asset.ends_with("-party.jpg"));

    let stored = temp_dir.path().join(asset.trim_start_matches("/files/"));
    assert_eq!(std::fs::read_to_string(stored).unwrap(), "helloworld");

    let served = send(&app, Request::builder().uri(&asset).body(Body::empty()).unwrap()).await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(body_bytes(served).await, b"helloworld");

    let frame = room.try_recv().unwrap();
    let inbound = decode_frame(&frame).unwrap().unwrap();
    assert_eq!(inbound.event_id.as_deref(), Some("evt-1"));
    match inbound.event {
        RealtimeEvent::PhotoUploaded(photo) => {
            assert_eq!(photo.url, asset);
            assert_eq!(photo.status, PhotoStatus::Pending);
            assert_eq!(photo.uploader_id.as_deref(), Some("guest-1"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let request = Request::builder().uri("/events/evt-1/photos").body(Body::empty()).unwrap();
    let listing: PhotoListResponse = body_json(send(&app, request).await).await;
    assert_eq!(listing.total, 1);
    assert_eq!(listing.photos[0].url, asset);

    // a finished upload still reports where it went
    let head = Request::builder().method("HEAD").uri(&location).body(Body::empty()).unwrap();
    let response = send(&app, head).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "upload-offset"), "10");
    assert_eq!(header_str(&response, "upload-asset"), asset);
}

#[tokio::test]
async fn test_resent_final_chunk_is_not_stored_twice() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let mut room = state.rooms.subscribe("evt-1");

    let response = send(&app, create_request(10, &metadata_header("party.jpg", "image/jpeg"))).await;
    let location = header_str(&response, "location").to_string();
    send(&app, patch_request(&location, 0, b"hello")).await;
    let response = send(&app, patch_request(&location, 5, b"world")).await;
    let asset = header_str(&response, "upload-asset").to_string();

    // the client never saw that ack and resends the last chunk
    let response = send(&app, patch_request(&location, 5, b"world")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(header_str(&response, "upload-offset"), "10");

    let response = send(&app, patch_request(&location, 10, b"")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "upload-offset"), "10");
    assert_eq!(header_str(&response, "upload-asset"), asset);

    let request = Request::builder().uri("/events/evt-1/photos").body(Body::empty()).unwrap();
    let listing: PhotoListResponse = body_json(send(&app, request).await).await;
    assert_eq!(listing.total, 1);
    assert!(room.try_recv().is_ok());
    assert!(room.try_recv().is_err(), "announced once");
}

#[tokio::test]
async fn test_finished_uploads_are_pruned_after_ttl() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let finished = upload_photo(&app).await;
    assert!(state.uploads.contains_key(&finished));

    let entry = state.uploads.get(&finished).map(|e| e.value().clone()).unwrap();
    entry.lock().await.completed_at =
        Some(chrono::Utc::now() - chrono::Duration::seconds(FINISHED_UPLOAD_TTL_SECS + 1));

    // pruning happens as new uploads are created
    let response = send(&app, create_request(4, &metadata_header("cake.jpg", "image/jpeg"))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(!state.uploads.contains_key(&finished));
    assert_eq!(state.uploads.len(), 1);
}

#[tokio::test]
async fn test_chunk_overwrites_bytes_past_the_acknowledged_offset() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));

    let response = send(&app, create_request(10, &metadata_header("party.jpg", "image/jpeg"))).await;
    let location = header_str(&response, "location").to_string();
    send(&app, patch_request(&location, 0, b"hello")).await;

    // leftovers of a write that failed halfway
    let partial = state.partial_dir().join(location.trim_start_matches("/uploads/"));
    let mut stray = std::fs::OpenOptions::new().append(true).open(&partial).unwrap();
    std::io::Write::write_all(&mut stray, b"wo?").unwrap();
    drop(stray);

    let response = send(&app, patch_request(&location, 5, b"world")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let asset = header_str(&response, "upload-asset").to_string();
    let stored = temp_dir.path().join(asset.trim_start_matches("/files/"));
    assert_eq!(std::fs::read_to_string(stored).unwrap(), "helloworld");
}

#[tokio::test]
async fn test_create_upload_validation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let metadata = metadata_header("party.jpg", "image/jpeg");

    let missing_length = Request::builder()
        .method("POST")
        .uri("/uploads")
        .header("Upload-Metadata", metadata.clone())
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, missing_length).await.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, create_request(2 * 1024 * 1024, &metadata)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = send(&app, create_request(10, &metadata_header("setup.exe", "application/x-msdownload"))).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // filename without an event
    let response = send(&app, create_request(10, "filename cGFydHkuanBn")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(state.uploads.is_empty());
}

#[tokio::test]
async fn test_patch_upload_validation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (_, app) = setup(test_config(temp_dir.path()));

    let response = send(&app, create_request(4, &metadata_header("party.jpg", "image/jpeg"))).await;
    let location = header_str(&response, "location").to_string();

    let wrong_type = Request::builder()
        .method("PATCH")
        .uri(&location)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header("Upload-Offset", "0")
        .body(Body::from("data"))
        .unwrap();
    assert_eq!(send(&app, wrong_type).await.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = send(&app, patch_request(&location, 0, b"too long")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, patch_request("/uploads/unknown", 0, b"data")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_direct_upload() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let boundary = "snapwall-boundary";

    let request = Request::builder()
        .method("POST")
        .uri("/uploads/direct")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(multipart_body(boundary, "../cake.jpg", "image/jpeg", "frosting")))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let uploaded: UploadResponse = body_json(response).await;
    assert!(uploaded.success);
    assert_eq!(uploaded.size, 8);
    assert!(uploaded.url.ends_with("-cake.jpg"));
    let stored = temp_dir.path().join(uploaded.url.trim_start_matches("/files/"));
    assert_eq!(std::fs::read_to_string(stored).unwrap(), "frosting");
    assert_eq!(state.photos.get("evt-1").unwrap().len(), 1);

    let request = Request::builder()
        .method("POST")
        .uri("/uploads/direct")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(multipart_body(boundary, "notes.txt", "text/plain", "hi")))
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_moderation_requires_api_key_and_broadcasts() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let photo_id = upload_photo(&app).await;
    let mut room = state.rooms.subscribe("evt-1");

    let approve_uri = format!("/admin/events/evt-1/photos/{}/approve", photo_id);
    let unauthenticated = Request::builder().method("POST").uri(&approve_uri).body(Body::empty()).unwrap();
    assert_eq!(send(&app, unauthenticated).await.status(), StatusCode::UNAUTHORIZED);

    let approve = Request::builder()
        .method("POST")
        .uri(&approve_uri)
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = send(&app, approve).await;
    assert_eq!(response.status(), StatusCode::OK);
    let moderated: ModerationResponse = body_json(response).await;
    assert_eq!(moderated.status, PhotoStatus::Approved);

    let frame = room.try_recv().unwrap();
    assert!(matches!(
        decode_frame(&frame).unwrap().unwrap().event,
        RealtimeEvent::PhotoApproved(update) if update.id == photo_id
    ));

    let reject = Request::builder()
        .method("POST")
        .uri(format!("/admin/events/evt-1/photos/{}/reject", photo_id))
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap();
    let moderated: ModerationResponse = body_json(send(&app, reject).await).await;
    assert_eq!(moderated.status, PhotoStatus::Deleted);
    assert_eq!(state.photos.get("evt-1").unwrap()[0].status, PhotoStatus::Deleted);

    let missing = Request::builder()
        .method("POST")
        .uri("/admin/events/evt-1/photos/nope/approve")
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, missing).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_guestbook_entry_is_broadcast() {
    let temp_dir = tempfile::tempdir().unwrap();
    let (state, app) = setup(test_config(temp_dir.path()));
    let mut room = state.rooms.subscribe("evt-1");

    let request = Request::builder()
        .method("POST")
        .uri("/admin/events/evt-1/guestbook")
        .header("X-API-Key", API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"guestName":" Ada ","message":"congrats","photoUrl":"/files/evt-1/ada.jpg"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let entry: GuestbookEntry = body_json(response).await;
    assert_eq!(entry.guest_name, "Ada");
    assert_eq!(entry.photo_url.as_deref(), Some("/files/evt-1/ada.jpg"));

    let frame = room.try_recv().unwrap();
    assert!(matches!(
        decode_frame(&frame).unwrap().unwrap().event,
        RealtimeEvent::GuestbookEntryAdded(added) if added.id == entry.id
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/admin/events/evt-1/guestbook")
        .header("X-API-Key", API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"guestName":"  "}"#))
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::BAD_REQUEST);
}
