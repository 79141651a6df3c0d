//!
//! # 下载器
//! 负责一次下载会话的编排：解析下载链接、探测镜像、恢复断点、规划分片、
//! 装配 worker 与调度器，并对外广播生命周期事件
//!

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::download::config::DownloadConfig;
use crate::download::error::{DownloadEndCause, DownloadError};
use crate::download::event::{DownloadEvent, EventHub};
use crate::download::instance::InstanceState;
use crate::download::monitor::Monitor;
use crate::download::planner::{select_cache_size, RangePlanner};
use crate::download::provider::{
    DriveCategory, FileEntity, FileSource, UrlProvider, URL_REQUEST_PAUSE,
};
use crate::download::range::RangeCtl;
use crate::download::rate_limit::RateLimit;
use crate::download::sink::DownloadSink;
use crate::download::status::DownloadStatus;
use crate::download::url_pool::{UrlEntry, UrlPool};
use crate::download::worker::DownloadAction;

/// Conventional checkpoint path: a sibling of the target file.
pub fn checkpoint_path(target: impl AsRef<Path>) -> PathBuf {
    let mut name = target.as_ref().as_os_str().to_os_string();
    name.push(".rdl.state");
    PathBuf::from(name)
}

/// Parallel-ranged downloader for a single remote file.
///
/// One value drives one file; `execute` blocks until the session reaches a
/// terminal state while `pause`, `resume` and `cancel` may be called from
/// other tasks.
pub struct Downloader {
    config: DownloadConfig,
    sink: Arc<dyn DownloadSink>,
    provider: Arc<dyn UrlProvider>,
    sub_providers: Vec<Arc<dyn UrlProvider>>,
    state_path: PathBuf,
    file_info: Mutex<Option<(FileSource, FileEntity)>>,
    events: Arc<EventHub>,
    control_tx: watch::Sender<DownloadAction>,
    control_rx: watch::Receiver<DownloadAction>,
    cancel: Mutex<CancellationToken>,
    paused: AtomicBool,
}

impl Downloader {
    pub fn new(
        sink: Arc<dyn DownloadSink>,
        config: DownloadConfig,
        provider: Arc<dyn UrlProvider>,
        sub_providers: Vec<Arc<dyn UrlProvider>>,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        let (control_tx, control_rx) = watch::channel(DownloadAction::Running);
        Self {
            config,
            sink,
            provider,
            sub_providers,
            state_path: state_path.into(),
            file_info: Mutex::new(None),
            events: Arc::new(EventHub::new()),
            control_tx,
            control_rx,
            cancel: Mutex::new(CancellationToken::new()),
            paused: AtomicBool::new(false),
        }
    }

    /// 设置文件信息
    pub fn set_file_info(&self, source: FileSource, entity: FileEntity) {
        *self.file_info.lock() = Some((source, entity));
    }

    /// Subscribes to session events. Events are delivered in order to a
    /// single consumer.
    pub fn events(&self) -> Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// 开始任务，阻塞到会话终止
    pub async fn execute(&self) -> Result<DownloadEndCause, DownloadError> {
        let (source, file) = self
            .file_info
            .lock()
            .clone()
            .ok_or(DownloadError::FileInfoMissing)?;

        // zero file, no need to download data
        if file.file_size == 0 {
            self.events.emit(DownloadEvent::Finish);
            return Ok(DownloadEndCause::Finished);
        }

        let result = self.run_session(source, &file).await;

        match &result {
            Ok(DownloadEndCause::Finished) => {
                self.events.emit(DownloadEvent::Success);
                self.instance_state().remove();
            }
            // user cancel keeps the checkpoint for a later resume
            Ok(DownloadEndCause::Cancelled) => {}
            Err(DownloadError::NoWorkers) if file.file_size == 0 => {
                self.events.emit(DownloadEvent::Success);
                self.instance_state().remove();
            }
            Err(DownloadError::FileDownloadForbidden) | Err(DownloadError::Provider(_)) => {
                self.events.emit(DownloadEvent::Cancel);
                self.instance_state().remove();
                self.events.emit(DownloadEvent::Fail);
            }
            Err(_) => {
                self.events.emit(DownloadEvent::Fail);
            }
        }
        self.events.emit(DownloadEvent::Finish);

        match result {
            Err(DownloadError::NoWorkers) if file.file_size == 0 => Ok(DownloadEndCause::Finished),
            other => other,
        }
    }

    /// 暂停
    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.emit(DownloadEvent::Pause);
        let _ = self.control_tx.send(DownloadAction::Paused);
    }

    /// 恢复
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::AcqRel) {
            return;
        }
        self.events.emit(DownloadEvent::Resume);
        let _ = self.control_tx.send(DownloadAction::Running);
    }

    /// 取消，保留断点信息
    pub fn cancel(&self) {
        self.events.emit(DownloadEvent::Cancel);
        self.cancel.lock().cancel();
    }

    async fn run_session(
        &self,
        source: FileSource,
        file: &FileEntity,
    ) -> Result<DownloadEndCause, DownloadError> {
        self.paused.store(false, Ordering::Release);
        let _ = self.control_tx.send(DownloadAction::Running);
        let cancel = self.session_token();

        let mut urls = self.resolve_download_urls(source, file).await?;
        let primary = urls.remove(0);
        let url_pool = Arc::new(
            UrlPool::probe(primary, urls, file.file_size, self.config.try_http).await,
        );
        info!(
            "url pool admitted {} origin(s) for {}",
            url_pool.len(),
            file.file_name
        );

        let instance_state = self.instance_state();
        let mut checkpoint = instance_state.get();
        if let Some(instance) = &checkpoint {
            if instance.total_size != file.file_size {
                warn!(
                    "checkpoint total size {} does not match {}, discarding",
                    instance.total_size, file.file_size
                );
                instance_state.remove();
                checkpoint = None;
            }
        }

        let status = DownloadStatus::new(file.file_size, RateLimit::new(self.config.max_rate));
        if let Some(instance) = &checkpoint {
            status.set_downloaded(instance.downloaded());
        }

        let plan = RangePlanner::new(&self.config)
            .plan(file.file_size, checkpoint.as_ref().map(|c| c.ranges.as_slice()));
        let cache_size = select_cache_size(self.config.cache_size, plan.block_size);
        debug!(
            "download task created: parallel {}, ranges {}, cache size {}",
            plan.parallel,
            plan.ranges.len(),
            cache_size
        );

        if let Err(err) = self.sink.allocate(file.file_size) {
            debug!("preallocate failed: {}", err);
        }

        let mut monitor = Monitor::new(
            self.config.clone(),
            status.clone(),
            self.sink.clone(),
            url_pool.clone(),
            self.control_rx.clone(),
            cancel.clone(),
            cache_size,
        );
        for (index, range) in plan.ranges.iter().enumerate() {
            let entry = match url_pool.slot_get(index, plan.ranges.len()) {
                Some(entry) => entry,
                None => {
                    warn!("worker {} skipped: empty url pool", index);
                    continue;
                }
            };
            let worker = monitor.build_worker(index, entry.url.clone(), RangeCtl::new(*range));
            monitor.append(worker);
        }
        monitor.set_reload_worker(true);
        monitor.set_instance_state(instance_state);

        self.events.emit(DownloadEvent::Execute);
        let status_token = cancel.child_token();
        self.spawn_status_task(status, status_token.clone());
        let result = monitor.execute().await;
        status_token.cancel();

        result
    }

    /// 获取各个账号的下载链接；主账号必须成功，辅助账号尽力而为
    async fn resolve_download_urls(
        &self,
        source: FileSource,
        file: &FileEntity,
    ) -> Result<Vec<UrlEntry>, DownloadError> {
        match source {
            // 相册源只支持主账号下载
            FileSource::Album => self.resolve_album_urls(file).await,
            // 文件源支持多账号分流下载
            FileSource::File => self.resolve_file_urls(file).await,
        }
    }

    async fn resolve_album_urls(&self, file: &FileEntity) -> Result<Vec<UrlEntry>, DownloadError> {
        let durl = self
            .provider
            .album_file_download_url(&file.album_id, &file.drive_id, &file.file_id)
            .await;
        tokio::time::sleep(URL_REQUEST_PAUSE).await;
        let durl = durl?;
        let url = durl
            .resolve(&file.file_extension)
            .ok_or(DownloadError::FileDownloadForbidden)?;
        Ok(vec![UrlEntry {
            url,
            drive_id: file.drive_id.clone(),
            file_id: file.file_id.clone(),
        }])
    }

    async fn resolve_file_urls(&self, file: &FileEntity) -> Result<Vec<UrlEntry>, DownloadError> {
        let durl = self
            .provider
            .file_download_url(&file.drive_id, &file.file_id)
            .await;
        tokio::time::sleep(URL_REQUEST_PAUSE).await;
        let url = durl?;
        if url.is_empty() {
            return Err(DownloadError::FileDownloadForbidden);
        }
        let mut entries = vec![UrlEntry {
            url,
            drive_id: file.drive_id.clone(),
            file_id: file.file_id.clone(),
        }];

        if self.sub_providers.is_empty() {
            return Ok(entries);
        }

        let drive_info = self.provider.drive_info().await?;
        let category = if drive_info.file_drive_id == file.drive_id {
            Some(DriveCategory::File)
        } else if drive_info.resource_drive_id == file.drive_id {
            Some(DriveCategory::Resource)
        } else {
            None
        };

        for sub in &self.sub_providers {
            if let Some(entry) = self.resolve_auxiliary(sub.as_ref(), file, category).await {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// 辅助账号按主账号的网盘类别在自己的命名空间中按路径查找同一文件，
    /// 任何一步失败都只是跳过该账号
    async fn resolve_auxiliary(
        &self,
        sub: &dyn UrlProvider,
        file: &FileEntity,
        category: Option<DriveCategory>,
    ) -> Option<UrlEntry> {
        let info = sub.drive_info().await.ok()?;
        let drive_id = match category {
            Some(DriveCategory::File) => info.file_drive_id,
            Some(DriveCategory::Resource) => info.resource_drive_id,
            None => String::new(),
        };
        if drive_id.is_empty() {
            debug!("auxiliary skipped: no drive matching the main category");
            return None;
        }

        let entity = sub.file_by_path(&drive_id, &file.path).await.ok()?;
        let durl = sub.file_download_url(&drive_id, &entity.file_id).await;
        tokio::time::sleep(URL_REQUEST_PAUSE).await;
        match durl {
            Ok(url) if !url.is_empty() => Some(UrlEntry {
                url,
                drive_id,
                file_id: entity.file_id,
            }),
            _ => {
                debug!("auxiliary skipped: no usable download url for {}", file.path);
                None
            }
        }
    }

    /// 启动执行状态处理事件，与会话一同退出
    fn spawn_status_task(&self, status: Arc<DownloadStatus>, token: CancellationToken) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        events.emit(DownloadEvent::Status(status.snapshot()));
                    }
                }
            }
        });
    }

    fn instance_state(&self) -> InstanceState {
        InstanceState::new(self.state_path.clone(), self.config.state_format)
    }

    fn session_token(&self) -> CancellationToken {
        let mut guard = self.cancel.lock();
        if guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
        guard.clone()
    }
}
