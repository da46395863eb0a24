use std::path::PathBuf;
use std::time::Duration;
use sha2::{Sha256, Digest};

use crate::realtime::ReconnectPolicy;
use crate::upload::UploadConfig;

/// server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// root directory for stored media, one subdirectory per event
    pub files_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// maximum upload size in bytes
    pub max_upload_size: u64,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// api key for moderation endpoints (hashed)
    pub api_key_hash: String,
    /// whether the resumable protocol is advertised by the status probe
    pub resumable_enabled: bool,
    /// accepted content types, `image/*` style wildcards allowed
    pub allowed_content_types: Vec<String>,
    /// cors allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        // get api key from env and hash it
        let api_key = std::env::var("ADMIN_API_KEY")
            .unwrap_or_else(|_| {
                tracing::warn!("⚠️  No ADMIN_API_KEY set! Using default 'changeme' - CHANGE THIS IN PRODUCTION!");
                "changeme".to_string()
            });

        Self {
            files_dir: std::env::var("FILES_DIR")
                .unwrap_or_else(|_| "./files".to_string())
                .into(),
            host: std::env::var("HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4848),
            max_upload_size: std::env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10 * 1024 * 1024 * 1024), // 10GB default
            worker_threads: std::env::var("WORKER_THREADS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(8),
            api_key_hash: Self::hash_api_key(&api_key),
            resumable_enabled: std::env::var("RESUMABLE_UPLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            allowed_content_types: split_list(
                &std::env::var("ALLOWED_CONTENT_TYPES").unwrap_or_else(|_| "image/*,video/*".to_string()),
            ),
            cors_origins: split_list(
                &std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
            ),
        }
    }

    // hash api key using sha256
    pub fn hash_api_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// check a content type against the allow list
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split_once('/')
                    .map(|(major, _)| major == prefix)
                    .unwrap_or(false),
                None => *allowed == content_type,
            }
        })
    }
}

/// client side settings for uploads and the realtime connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// base url of the server, `http(s)://host:port`
    pub server_url: String,
    pub chunk_size: usize,
    pub retry_delays: Vec<Duration>,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// `None` retries forever
    pub reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4848".to_string(),
            chunk_size: 5 * 1024 * 1024,
            retry_delays: UploadConfig::default().retry_delays,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
            reconnect_attempts: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str, fallback: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            server_url: std::env::var("SNAPWALL_SERVER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.server_url),
            chunk_size: std::env::var("SNAPWALL_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.chunk_size),
            retry_delays: std::env::var("SNAPWALL_RETRY_DELAYS_MS")
                .ok()
                .and_then(|v| parse_delays(&v))
                .unwrap_or(defaults.retry_delays),
            reconnect_initial: millis("SNAPWALL_RECONNECT_INITIAL_MS", defaults.reconnect_initial),
            reconnect_max: millis("SNAPWALL_RECONNECT_MAX_MS", defaults.reconnect_max),
            reconnect_attempts: std::env::var("SNAPWALL_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            retry_delays: self.retry_delays.clone(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: self.reconnect_initial,
            max: self.reconnect_max,
            max_attempts: self.reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }

    /// websocket endpoint derived from the server url
    pub fn realtime_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", ws)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// "0,1000,3000" -> delays; any bad entry invalidates the whole list
fn parse_delays(raw: &str) -> Option<Vec<Duration>> {
    let delays: Vec<Duration> = split_list(raw)
        .iter()
        .map(|ms| ms.parse::<u64>().ok().map(Duration::from_millis))
        .collect::<Option<_>>()?;
    // an empty schedule would turn retries off entirely
    (!delays.is_empty()).then_some(delays)
}
