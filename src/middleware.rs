use axum::http::{HeaderValue, header, Request, StatusCode};
use axum::response::Response;
use axum::middleware::Next;
use axum::body::Body;

use crate::config::ServerConfig;

// api key validation for moderation routes
pub async fn validate_api_key(
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    // hash of the configured key, injected as an extension by the router
    let api_key_hash = req
        .extensions()
        .get::<String>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let provided_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Moderation request without X-API-Key header");
            StatusCode::UNAUTHORIZED
        })?;

    if ServerConfig::hash_api_key(provided_key) != *api_key_hash {
        tracing::warn!("🚫 Invalid API key for {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    tracing::debug!("Moderator authenticated for {}", req.uri().path());
    Ok(next.run(req).await)
}

/// security headers; media and the realtime socket are same-origin
pub async fn add_security_headers(
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; img-src 'self' data: blob:; media-src 'self' blob:; connect-src 'self' ws: wss:",
        ),
    );

    response
}
