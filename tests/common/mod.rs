#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::TimeZone;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use snapwall::error::{RealtimeError, UploadError};
use snapwall::protocol::ControlMessage;
use snapwall::realtime::{Connection, ConnectionStatus, Connector};
use snapwall::upload::{ChunkAck, MediaFile, SessionState, UploadMetadata, UploadObserver, UploadTransport};

pub const MB: usize = 1024 * 1024;

pub fn media(name: &str, size: usize) -> MediaFile {
    let modified = chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    MediaFile::new(name, "image/jpeg", modified, data)
}

pub fn metadata(file: &MediaFile) -> UploadMetadata {
    UploadMetadata::for_file(file, "evt-1", "guest-1")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe,
    Create,
    Offset(String),
    Chunk { offset: u64, len: usize },
    Direct,
}

/// what the next chunk request does
pub enum ChunkStep {
    Fail(UploadError),
    /// store the bytes but lose the acknowledgement
    ApplyThenFail,
    /// never answer
    Hang,
}

#[derive(Default)]
pub struct MockState {
    pub uploads: HashMap<String, (u64, u64)>,
    pub calls: Vec<Call>,
    pub create_script: VecDeque<UploadError>,
    pub chunk_script: VecDeque<ChunkStep>,
    pub fail_offsets: bool,
    next_id: usize,
}

/// in-memory server speaking the resumable protocol
pub struct MockTransport {
    pub resumable: bool,
    pub state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { resumable: true, state: Mutex::new(MockState::default()) })
    }

    pub fn without_resumable() -> Arc<Self> {
        Arc::new(Self { resumable: false, state: Mutex::new(MockState::default()) })
    }

    pub fn script_chunk(&self, step: ChunkStep) {
        self.state.lock().unwrap().chunk_script.push_back(step);
    }

    pub fn script_create(&self, err: UploadError) {
        self.state.lock().unwrap().create_script.push_back(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn chunk_offsets(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Chunk { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }
}

fn ack(location: &str, total: u64, offset: u64) -> ChunkAck {
    ChunkAck {
        offset,
        asset: (offset == total).then(|| format!("/files/evt-1{}", location)),
    }
}

#[async_trait]
impl UploadTransport for MockTransport {
    async fn resumable_enabled(&self) -> bool {
        self.state.lock().unwrap().calls.push(Call::Probe);
        self.resumable
    }

    async fn create(&self, _metadata: &UploadMetadata, total: u64) -> Result<String, UploadError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create);
        if let Some(err) = state.create_script.pop_front() {
            return Err(err);
        }
        state.next_id += 1;
        let location = format!("/uploads/{}", state.next_id);
        state.uploads.insert(location.clone(), (total, 0));
        Ok(location)
    }

    async fn offset(&self, location: &str) -> Result<ChunkAck, UploadError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Offset(location.to_string()));
        if state.fail_offsets {
            return Err(UploadError::Network("connection reset".into()));
        }
        state
            .uploads
            .get(location)
            .map(|(total, offset)| ack(location, *total, *offset))
            .ok_or_else(|| UploadError::Rejected { status: 404, message: "unknown upload".into() })
    }

    async fn send_chunk(&self, location: &str, offset: u64, chunk: Bytes) -> Result<ChunkAck, UploadError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Chunk { offset, len: chunk.len() });
            state.chunk_script.pop_front()
        };

        let apply_then_fail = match step {
            Some(ChunkStep::Fail(err)) => return Err(err),
            Some(ChunkStep::Hang) => std::future::pending::<bool>().await,
            Some(ChunkStep::ApplyThenFail) => true,
            None => false,
        };

        let mut state = self.state.lock().unwrap();
        let (total, server_offset) = state
            .uploads
            .get_mut(location)
            .ok_or_else(|| UploadError::Rejected { status: 404, message: "unknown upload".into() })?;
        if offset != *server_offset {
            return Err(UploadError::OffsetConflict { server_offset: Some(*server_offset) });
        }
        *server_offset += chunk.len() as u64;
        let ack = ack(location, *total, *server_offset);
        if apply_then_fail {
            return Err(UploadError::Network("ack lost".into()));
        }
        Ok(ack)
    }

    async fn upload_direct(&self, metadata: &UploadMetadata, _data: Bytes) -> Result<String, UploadError> {
        self.state.lock().unwrap().calls.push(Call::Direct);
        Ok(format!("/files/{}/{}", metadata.event_id, metadata.filename))
    }
}

/// records every callback a session fires
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<SessionState>>,
    pub progress: Mutex<Vec<u8>>,
    pub retries: Mutex<Vec<(usize, Duration)>>,
    pub successes: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl UploadObserver for RecordingObserver {
    fn on_state(&self, state: SessionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
    }

    fn on_retry(&self, attempt: usize, delay: Duration) {
        self.retries.lock().unwrap().push((attempt, delay));
    }

    fn on_success(&self, asset: &str) {
        self.successes.lock().unwrap().push(asset.to_string());
    }

    fn on_error(&self, error: &UploadError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// the server side of one mock realtime connection
pub struct ServerEnd {
    pub control: mpsc::UnboundedReceiver<ControlMessage>,
    pub frames: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    /// control messages received so far
    pub fn drain(&mut self) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.control.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn push(&self, frame: impl Into<String>) {
        self.frames.send(frame.into()).unwrap();
    }
}

#[derive(Clone)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    pub failures: Arc<AtomicUsize>,
    pub attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            failures: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, servers)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, RealtimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RealtimeError::Connect("refused".into()));
        }

        let (outbound, control) = mpsc::unbounded_channel();
        let (frames, inbound) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd { control, frames });
        Ok(Connection { outbound, inbound })
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    tokio::time::timeout(Duration::from_secs(30), servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub async fn wait_for_status(
    status: &mut watch::Receiver<ConnectionStatus>,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(30), status.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("manager dropped");
}

pub fn photo_frame(event_id: &str, photo_id: &str) -> String {
    serde_json::json!({
        "type": "photo_uploaded",
        "eventId": event_id,
        "payload": {
            "id": photo_id,
            "url": format!("/files/{}/{}.jpg", event_id, photo_id),
            "status": "pending",
            "uploaderId": "guest-1",
            "createdAt": "2026-10-16T12:00:00Z"
        }
    })
    .to_string()
}

pub fn status_frame(kind: &str, event_id: &str, photo_id: &str) -> String {
    serde_json::json!({
        "type": kind,
        "eventId": event_id,
        "payload": { "id": photo_id }
    })
    .to_string()
}
