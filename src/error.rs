use thiserror::Error;

/// failure categories an upload can end (or pause) in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// chunk or handshake failure, retried per schedule
    TransientNetwork,
    /// server refused the upload outright, never retried
    PermanentRejection,
    /// resume check failed, session falls back to a fresh transfer
    ResumeLookup,
    /// caller aborted the session
    Cancelled,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("offset conflict, server is at byte {server_offset:?}")]
    OffsetConflict { server_offset: Option<u64> },

    #[error("resume lookup failed: {0}")]
    ResumeLookup(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: Box<UploadError> },

    #[error("upload cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    /// the request could not be built or its reply decoded; retrying repeats it
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::Rejected { .. } | UploadError::Malformed(_) => UploadErrorKind::PermanentRejection,
            UploadError::ResumeLookup(_) => UploadErrorKind::ResumeLookup,
            UploadError::Cancelled => UploadErrorKind::Cancelled,
            UploadError::RetriesExhausted { last, .. } => last.kind(),
            _ => UploadErrorKind::TransientNetwork,
        }
    }

    /// whether another attempt of the same step may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Network(_)
                | UploadError::OffsetConflict { .. }
                | UploadError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_decode() {
            UploadError::Malformed(err.to_string())
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
}
