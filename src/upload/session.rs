use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::resume::{Fingerprint, ResumeStore};
use super::transport::{ChunkAck, UploadTransport};
use super::{MediaFile, UploadConfig, UploadMetadata};
use crate::error::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    CheckingResume,
    Transferring,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }
}

/// callbacks fired while a session runs, in I/O completion order
pub trait UploadObserver: Send + Sync {
    fn on_state(&self, _state: SessionState) {}
    fn on_progress(&self, _percent: u8) {}
    fn on_retry(&self, _attempt: usize, _delay: Duration) {}
    fn on_success(&self, _asset: &str) {}
    fn on_error(&self, _error: &UploadError) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

#[derive(Debug)]
struct Progress {
    state: SessionState,
    bytes_acknowledged: u64,
    bytes_total: u64,
    percent: u8,
}

/// one resumable transfer of one file
pub struct UploadSession {
    id: String,
    transport: Arc<dyn UploadTransport>,
    resume: Arc<dyn ResumeStore>,
    config: UploadConfig,
    progress: Mutex<Progress>,
    cancel: Mutex<CancellationToken>,
}

fn percent_of(acknowledged: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (acknowledged.min(total) * 100 / total) as u8
}

impl UploadSession {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn UploadTransport>,
        resume: Arc<dyn ResumeStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            resume,
            config,
            progress: Mutex::new(Progress {
                state: SessionState::Initializing,
                bytes_acknowledged: 0,
                bytes_total: 0,
                percent: 0,
            }),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn bytes_acknowledged(&self) -> u64 {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).bytes_acknowledged
    }

    pub fn bytes_total(&self) -> u64 {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).bytes_total
    }

    /// abort the running attempt, or the next one if none has started yet;
    /// the server keeps its partial upload
    pub fn cancel(&self) {
        debug!(session = %self.id, "Cancelling upload");
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();
    }

    /// run the session to a terminal state.
    ///
    /// Exactly one of `on_success` / `on_error` fires on the observer, and the
    /// same outcome is returned. Calling `start` again after a failure is a
    /// manual retry and goes back through resume detection.
    pub async fn start(
        &self,
        file: &MediaFile,
        metadata: &UploadMetadata,
        observer: &dyn UploadObserver,
    ) -> Result<String, UploadError> {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone();
        {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.bytes_total = file.size();
            progress.bytes_acknowledged = 0;
            progress.percent = 0;
            progress.state = SessionState::Initializing;
        }
        observer.on_state(SessionState::Initializing);
        info!(session = %self.id, "📤 Starting upload of {} ({} bytes)", file.name, file.size());

        // biased: a token cancelled before start never lets `run` begin
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(UploadError::Cancelled),
            result = self.run(file, metadata, observer) => result,
        };
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();

        match result {
            Ok(asset) => {
                self.acknowledge(file.size(), observer);
                self.transition(SessionState::Succeeded, observer);
                info!(session = %self.id, "✅ Upload finished: {}", asset);
                observer.on_success(&asset);
                Ok(asset)
            }
            Err(e) => {
                self.transition(SessionState::Failed, observer);
                match &e {
                    UploadError::Cancelled => info!(session = %self.id, "Upload cancelled"),
                    other => error!(session = %self.id, "❌ Upload failed: {}", other),
                }
                observer.on_error(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        file: &MediaFile,
        metadata: &UploadMetadata,
        observer: &dyn UploadObserver,
    ) -> Result<String, UploadError> {
        if !self.transport.resumable_enabled().await {
            debug!(session = %self.id, "Resumable uploads disabled, sending file in one request");
            self.transition(SessionState::Transferring, observer);
            self.report(observer);
            return self
                .retrying(observer, || self.transport.upload_direct(metadata, file.data.clone()))
                .await;
        }

        self.transition(SessionState::CheckingResume, observer);
        let fingerprint = Fingerprint::of(file);
        let resumed = self.check_resume(&fingerprint, file.size()).await;

        self.transition(SessionState::Transferring, observer);
        let (location, position) = match resumed {
            Some(found) => found,
            None => {
                let location = self
                    .retrying(observer, || self.transport.create(metadata, file.size()))
                    .await?;
                self.resume.save(&fingerprint, location.clone());
                (location, ChunkAck { offset: 0, asset: None })
            }
        };

        let asset = self.transfer(file, &location, position, observer).await?;
        self.resume.remove(&fingerprint);
        Ok(asset)
    }

    /// look for an earlier partial upload of the same file
    async fn check_resume(&self, fingerprint: &Fingerprint, total: u64) -> Option<(String, ChunkAck)> {
        let location = self.resume.find(fingerprint)?;
        match self.transport.offset(&location).await {
            Ok(position) if position.offset <= total => {
                info!(session = %self.id, "Resuming {} from byte {}", location, position.offset);
                Some((location, position))
            }
            Ok(position) => {
                warn!(
                    session = %self.id,
                    "Server offset {} exceeds file size {}, starting over", position.offset, total
                );
                self.resume.remove(fingerprint);
                None
            }
            Err(e) => {
                let e = UploadError::ResumeLookup(e.to_string());
                warn!(session = %self.id, "{}, starting a fresh transfer", e);
                self.resume.remove(fingerprint);
                None
            }
        }
    }

    async fn transfer(
        &self,
        file: &MediaFile,
        location: &str,
        position: ChunkAck,
        observer: &dyn UploadObserver,
    ) -> Result<String, UploadError> {
        let total = file.size();
        if let Some(asset) = position.finished(total) {
            info!(session = %self.id, "Server already stored {} as {}", location, asset);
            return Ok(asset.to_string());
        }
        let chunk_size = self.config.chunk_size.max(1) as u64;
        let mut offset = position.offset;
        let mut attempts = 0;
        self.acknowledge(offset, observer);

        loop {
            let end = (offset + chunk_size).min(total);
            let chunk = file.data.slice(offset as usize..end as usize);
            trace!(session = %self.id, "Sending bytes {}..{} of {}", offset, end, total);

            let sent = self
                .transport
                .send_chunk(location, offset, chunk)
                .await
                .and_then(|ack| {
                    if ack.offset <= offset && end > offset {
                        Err(UploadError::InvalidResponse(format!("offset did not advance past {}", offset)))
                    } else {
                        Ok(ack)
                    }
                });

            match sent {
                Ok(ack) => {
                    attempts = 0;
                    offset = ack.offset;
                    self.acknowledge(offset, observer);
                    if offset >= total {
                        return Ok(ack.asset.unwrap_or_else(|| location.to_string()));
                    }
                }
                Err(e) => {
                    let delay = self.next_delay(&mut attempts, e)?;
                    observer.on_retry(attempts, delay);
                    tokio::time::sleep(delay).await;
                    // the server is authoritative about what it holds; a lost
                    // final ack shows up here as a finished upload
                    match self.transport.offset(location).await {
                        Ok(position) => {
                            if let Some(asset) = position.finished(total) {
                                info!(session = %self.id, "Final chunk was stored before the failure");
                                return Ok(asset.to_string());
                            }
                            debug!(session = %self.id, "Resynced offset {} -> {}", offset, position.offset);
                            offset = position.offset.min(total);
                        }
                        Err(e) => warn!(session = %self.id, "Offset resync failed: {}", e),
                    }
                }
            }
        }
    }

    /// run one step, consuming the retry schedule on retryable failures
    async fn retrying<T, F, Fut>(&self, observer: &dyn UploadObserver, mut step: F) -> Result<T, UploadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut attempts = 0;
        loop {
            match step().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let delay = self.next_delay(&mut attempts, e)?;
                    observer.on_retry(attempts, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn next_delay(&self, attempts: &mut usize, err: UploadError) -> Result<Duration, UploadError> {
        if !err.is_retryable() {
            return Err(err);
        }
        match self.config.retry_delays.get(*attempts) {
            Some(delay) => {
                *attempts += 1;
                warn!(session = %self.id, "Attempt failed ({}), retry {} in {:?}", err, attempts, delay);
                Ok(*delay)
            }
            None => Err(UploadError::RetriesExhausted {
                attempts: *attempts + 1,
                last: Box::new(err),
            }),
        }
    }

    fn transition(&self, state: SessionState, observer: &dyn UploadObserver) {
        {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            if progress.state == state {
                return;
            }
            debug!(session = %self.id, "{:?} -> {:?}", progress.state, state);
            progress.state = state;
        }
        observer.on_state(state);
    }

    // record an acknowledged offset; reported progress never goes backwards
    fn acknowledge(&self, offset: u64, observer: &dyn UploadObserver) {
        {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.bytes_acknowledged = offset.min(progress.bytes_total);
            let percent = percent_of(progress.bytes_acknowledged, progress.bytes_total);
            progress.percent = progress.percent.max(percent);
        }
        self.report(observer);
    }

    fn report(&self, observer: &dyn UploadObserver) {
        let percent = self.progress.lock().unwrap_or_else(PoisonError::into_inner).percent;
        observer.on_progress(percent);
    }
}
