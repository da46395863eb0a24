use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, head, post},
    Extension,
};
use tower_http::{
    services::ServeDir,
    trace::TraceLayer,
    compression::CompressionLayer,
    limit::RequestBodyLimitLayer,
    cors::{AllowOrigin, Any, CorsLayer},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::handlers::{
    add_guestbook_entry, approve_photo, create_upload, direct_upload, health_check,
    list_event_photos, patch_upload, reject_photo, upload_offset, upload_status,
};
use crate::middleware::{add_security_headers, validate_api_key};
use crate::state::AppState;
use crate::utils::shutdown_signal;
use crate::config::ServerConfig;
use crate::ws::ws_handler;

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::HEAD,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
        ])
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers(Any)
        .expose_headers(Any)
}

/// guest facing routes: uploads, gallery fetch, realtime socket and media
pub fn build_public_router(state: Arc<AppState>) -> Router {
    tracing::debug!("Building public router, max upload size {} bytes", state.config.max_upload_size);
    let files = tower::ServiceBuilder::new()
        .layer(CompressionLayer::new()
            .gzip(true)
            .br(true)
            .zstd(true)
        )
        .service(ServeDir::new(&state.files_dir));
    let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/uploads/status", get(upload_status))
        .route("/uploads", post(create_upload))
        .route("/uploads/direct", post(direct_upload))
        .route("/uploads/:id", head(upload_offset).patch(patch_upload))
        .route("/events/:event_id/photos", get(list_event_photos))
        .route("/ws", get(ws_handler))
        .nest_service("/files", files)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(cors)
        .with_state(state)
}

/// moderation routes, api key protected and rate limited
pub fn build_admin_router(state: Arc<AppState>) -> Router {
    // configure rate limiting
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .finish()
            .expect("valid governor configuration"),
    );
    let api_key_hash = state.config.api_key_hash.clone();

    Router::new()
        .route("/admin/events/:event_id/photos/:photo_id/approve", post(approve_photo))
        .route("/admin/events/:event_id/photos/:photo_id/reject", post(reject_photo))
        .route("/admin/events/:event_id/guestbook", post(add_guestbook_entry))
        .layer(axum::middleware::from_fn(validate_api_key))
        .layer(Extension(api_key_hash))
        .layer(GovernorLayer { config: governor_conf })
        .with_state(state)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    build_public_router(state.clone())
        .merge(build_admin_router(state))
        .layer(TraceLayer::new_for_http())
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!("Listener bound to {}", addr);

    tracing::info!("Server running and ready to accept connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true)
    .await
}

/// print startup banner with server info
pub fn print_startup_banner(config: &ServerConfig) {
    tracing::info!("snapwall starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 API + REALTIME: http://{}:{} (ws at /ws)", config.host, config.port);
    tracing::info!("📁 Storing media in: {:?}", config.files_dir.canonicalize().unwrap_or(config.files_dir.clone()));
    tracing::info!("♻️  Resumable uploads: {}", if config.resumable_enabled { "enabled" } else { "disabled" });
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
