use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::download::error::WorkerError;
use crate::download::range::RangeCtl;
use crate::download::sink::DownloadSink;
use crate::download::status::DownloadStatus;

/// 所有 worker 共享的控制信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Init = 0,
    Fetching = 1,
    Writing = 2,
    Paused = 3,
    Failed = 4,
    Done = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Fetching,
            2 => WorkerState::Writing,
            3 => WorkerState::Paused,
            4 => WorkerState::Failed,
            5 => WorkerState::Done,
            _ => WorkerState::Init,
        }
    }
}

/// How one worker run ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    Done,
    Cancelled,
    Failed(WorkerError),
}

/// Downloads exactly one byte range through a ranged GET against its bound
/// URL, streaming body chunks into the shared sink.
pub struct Worker {
    pub id: usize,
    url: String,
    range: Arc<RangeCtl>,
    client: Client,
    sink: Arc<dyn DownloadSink>,
    status: Arc<DownloadStatus>,
    control: watch::Receiver<DownloadAction>,
    cancel: CancellationToken,
    cache_size: usize,
    state: AtomicU8,
    speed_window: AtomicU64,
    speed: AtomicU64,
    error_count: AtomicU32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        url: String,
        range: Arc<RangeCtl>,
        client: Client,
        sink: Arc<dyn DownloadSink>,
        status: Arc<DownloadStatus>,
        control: watch::Receiver<DownloadAction>,
        cancel: CancellationToken,
        cache_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            url,
            range,
            client,
            sink,
            status,
            control,
            cancel,
            cache_size: cache_size.max(1),
            state: AtomicU8::new(WorkerState::Init as u8),
            speed_window: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn range_ctl(&self) -> &Arc<RangeCtl> {
        &self.range
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Bytes received since the previous monitor tick.
    pub fn drain_speed_window(&self) -> u64 {
        self.speed_window.swap(0, Ordering::AcqRel)
    }

    pub fn set_speed(&self, bytes_per_second: u64) {
        self.speed.store(bytes_per_second, Ordering::Release);
    }

    pub fn speed_per_second(&self) -> u64 {
        self.speed.load(Ordering::Acquire)
    }

    /// One attempt at the assigned range. Retry policy lives in the
    /// monitor; the cursor survives failures so a rerun resumes in place.
    pub async fn run(self: Arc<Self>) -> WorkerOutcome {
        if self.range.is_complete() {
            self.set_state(WorkerState::Done);
            return WorkerOutcome::Done;
        }

        select! {
            result = self.fetch_range() => match result {
                Ok(()) => {
                    self.set_state(WorkerState::Done);
                    WorkerOutcome::Done
                }
                Err(err) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    self.set_state(WorkerState::Failed);
                    warn!("worker {} failed at byte {}: {}", self.id, self.range.current(), err);
                    WorkerOutcome::Failed(err)
                }
            },
            _ = self.cancel.cancelled() => {
                debug!("worker {} cancelled", self.id);
                WorkerOutcome::Cancelled
            }
        }
    }

    async fn fetch_range(&self) -> Result<(), WorkerError> {
        let mut control = self.control.clone();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.cache_size);

        self.park_if_paused(&mut control, &mut buffer).await?;
        if self.range.is_complete() {
            return Ok(());
        }

        self.set_state(WorkerState::Fetching);
        let current = self.range.current();
        let end = self.range.end();
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={}-{}", current, end - 1))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            // the origin ignored the range request
            return Err(WorkerError::RangeIgnored);
        }
        if !status.is_success() {
            return Err(WorkerError::Status(status));
        }

        let mut stream = response.bytes_stream();
        loop {
            self.park_if_paused(&mut control, &mut buffer).await?;
            if self.range.is_complete() {
                return Ok(());
            }

            match stream.next().await {
                Some(Ok(bytes)) => {
                    if let Some(limit) = self.status.rate_limit() {
                        limit.acquire(bytes.len() as u64).await;
                    }
                    self.speed_window.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    buffer.extend_from_slice(&bytes);
                    if buffer.len() >= self.cache_size && self.flush(&mut buffer)? {
                        return Ok(());
                    }
                }
                Some(Err(err)) => {
                    // keep what is already complete, then surface
                    self.flush(&mut buffer)?;
                    return Err(WorkerError::Http(err));
                }
                None => break,
            }
        }

        self.flush(&mut buffer)?;
        if self.range.is_complete() {
            Ok(())
        } else {
            Err(WorkerError::BodyTruncated)
        }
    }

    /// Writes buffered bytes at `current`, clamped to the live `end`.
    /// Returns true once the range is complete.
    fn flush(&self, buffer: &mut Vec<u8>) -> Result<bool, WorkerError> {
        let current = self.range.current();
        let room = self.range.end().saturating_sub(current) as usize;
        let n = buffer.len().min(room);
        if n > 0 {
            self.set_state(WorkerState::Writing);
            self.sink.write_at(&buffer[..n], current)?;
            self.range.advance(n as u64);
            self.status.add(n as u64);
            self.set_state(WorkerState::Fetching);
        }
        buffer.clear();
        Ok(self.range.is_complete())
    }

    /// Parks between chunks while the session is paused. Complete buffered
    /// bytes are flushed first so the next checkpoint reflects them.
    async fn park_if_paused(
        &self,
        control: &mut watch::Receiver<DownloadAction>,
        buffer: &mut Vec<u8>,
    ) -> Result<(), WorkerError> {
        if *control.borrow() != DownloadAction::Paused {
            return Ok(());
        }

        self.flush(buffer)?;
        if self.range.is_complete() {
            return Ok(());
        }

        self.set_state(WorkerState::Paused);
        debug!("worker {} parked", self.id);
        while *control.borrow_and_update() == DownloadAction::Paused {
            if control.changed().await.is_err() {
                break;
            }
        }
        self.set_state(WorkerState::Fetching);
        Ok(())
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
