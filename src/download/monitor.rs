use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::download::config::DownloadConfig;
use crate::download::error::{DownloadEndCause, DownloadError};
use crate::download::instance::{DownloadInstance, InstanceState};
use crate::download::range::{Range, RangeCtl};
use crate::download::sink::DownloadSink;
use crate::download::status::DownloadStatus;
use crate::download::url_pool::UrlPool;
use crate::download::worker::{DownloadAction, Worker, WorkerOutcome, WorkerState};

const WORKER_CLIENT_TIMEOUT: Duration = Duration::from_secs(600);
const RETRY_DELAY: Duration = Duration::from_secs(1);

type WorkerTask = JoinHandle<(usize, WorkerOutcome)>;

#[derive(Default)]
struct Supervision {
    attempts: u32,
    reloaded: bool,
    last_current: u64,
    stall_ticks: u32,
}

/// 调度器：并发运行所有 worker，失败重试、停滞拆分、周期性落盘断点
///
/// The monitor owns the worker set for the lifetime of one `execute` call.
/// Workers run on their own tasks; the supervision loop multiplexes their
/// completions against a periodic tick and the session's cancel token.
pub struct Monitor {
    config: DownloadConfig,
    status: Arc<DownloadStatus>,
    sink: Arc<dyn DownloadSink>,
    url_pool: Arc<UrlPool>,
    control: watch::Receiver<DownloadAction>,
    cancel: CancellationToken,
    cache_size: usize,
    instance_state: Option<InstanceState>,
    reload_worker: bool,
    workers: HashMap<usize, Arc<Worker>>,
    ranges: Vec<Arc<RangeCtl>>,
    next_id: usize,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DownloadConfig,
        status: Arc<DownloadStatus>,
        sink: Arc<dyn DownloadSink>,
        url_pool: Arc<UrlPool>,
        control: watch::Receiver<DownloadAction>,
        cancel: CancellationToken,
        cache_size: usize,
    ) -> Self {
        Self {
            config,
            status,
            sink,
            url_pool,
            control,
            cancel,
            cache_size,
            instance_state: None,
            reload_worker: false,
            workers: HashMap::new(),
            ranges: Vec::new(),
            next_id: 0,
        }
    }

    pub fn set_instance_state(&mut self, instance_state: InstanceState) {
        self.instance_state = Some(instance_state);
    }

    /// Failed ranges get a replacement worker on another URL instead of
    /// being abandoned. Requires origins that honor range resumption.
    pub fn set_reload_worker(&mut self, reload: bool) {
        self.reload_worker = reload;
    }

    pub fn build_worker(&self, id: usize, url: String, range: Arc<RangeCtl>) -> Arc<Worker> {
        let client = Client::builder()
            .timeout(WORKER_CLIENT_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());
        Worker::new(
            id,
            url,
            range,
            client,
            self.sink.clone(),
            self.status.clone(),
            self.control.clone(),
            self.cancel.clone(),
            self.cache_size,
        )
    }

    pub fn append(&mut self, worker: Arc<Worker>) {
        self.insert_worker(worker, true);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs the session to a terminal state. The final checkpoint flush
    /// always happens; removing it on success is the caller's decision.
    pub async fn execute(&mut self) -> Result<DownloadEndCause, DownloadError> {
        if self.workers.is_empty() {
            return Err(DownloadError::NoWorkers);
        }

        let mut supervision: HashMap<usize, Supervision> = self
            .workers
            .keys()
            .map(|id| (*id, Supervision::default()))
            .collect();
        let mut tasks: FuturesUnordered<WorkerTask> = self
            .workers
            .values()
            .map(|worker| Self::spawn(worker.clone()))
            .collect();

        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut end_cause: Option<DownloadEndCause> = None;
        let mut session_error: Option<DownloadError> = None;

        while end_cause.is_none() && session_error.is_none() {
            select! {
                finished = tasks.next(), if !tasks.is_empty() => {
                    match finished {
                        Some(Ok((id, outcome))) => self.on_worker_end(
                            id,
                            outcome,
                            &mut supervision,
                            &mut tasks,
                            &mut end_cause,
                            &mut session_error,
                        ),
                        Some(Err(join_err)) => error!("worker task aborted: {}", join_err),
                        None => {}
                    }
                    if end_cause.is_none() && session_error.is_none() && tasks.is_empty() {
                        if self.all_complete() {
                            end_cause = Some(DownloadEndCause::Finished);
                        } else {
                            session_error = Some(DownloadError::NoWorkers);
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick(&mut supervision, &mut tasks);
                }
                _ = cancel.cancelled() => {
                    end_cause = Some(DownloadEndCause::Cancelled);
                }
            }
        }

        self.flush_checkpoint();

        match session_error {
            Some(err) => Err(err),
            None => Ok(end_cause.unwrap_or(DownloadEndCause::Finished)),
        }
    }

    fn spawn(worker: Arc<Worker>) -> WorkerTask {
        tokio::spawn(async move {
            let id = worker.id;
            (id, worker.run().await)
        })
    }

    fn respawn_after(worker: Arc<Worker>, delay: Duration) -> WorkerTask {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = worker.id;
            (id, worker.run().await)
        })
    }

    fn insert_worker(&mut self, worker: Arc<Worker>, track_range: bool) {
        if track_range {
            self.ranges.push(worker.range_ctl().clone());
        }
        self.next_id = self.next_id.max(worker.id + 1);
        self.workers.insert(worker.id, worker);
    }

    fn on_worker_end(
        &mut self,
        id: usize,
        outcome: WorkerOutcome,
        supervision: &mut HashMap<usize, Supervision>,
        tasks: &mut FuturesUnordered<WorkerTask>,
        end_cause: &mut Option<DownloadEndCause>,
        session_error: &mut Option<DownloadError>,
    ) {
        match outcome {
            WorkerOutcome::Done => {
                debug!("worker {} done", id);
                if self.all_complete() {
                    *end_cause = Some(DownloadEndCause::Finished);
                }
            }
            WorkerOutcome::Cancelled => {
                *end_cause = Some(DownloadEndCause::Cancelled);
            }
            WorkerOutcome::Failed(err) => {
                if err.is_fatal() {
                    error!("worker {} hit a fatal error: {}", id, err);
                    *session_error = Some(err.into());
                    return;
                }

                let worker = match self.workers.get(&id) {
                    Some(worker) => worker.clone(),
                    None => return,
                };
                let (attempts, reloaded) = {
                    let entry = supervision.entry(id).or_default();
                    (entry.attempts, entry.reloaded)
                };

                if err.is_retryable() && attempts < self.config.request_retry_count {
                    supervision.entry(id).or_default().attempts += 1;
                    debug!(
                        "worker {} retry {}/{} at byte {}",
                        id,
                        attempts + 1,
                        self.config.request_retry_count,
                        worker.range_ctl().current()
                    );
                    tasks.push(Self::respawn_after(worker, RETRY_DELAY));
                    return;
                }

                if self.reload_worker && !reloaded {
                    supervision.entry(id).or_default().reloaded = true;
                    let next_url = self.url_pool.sequential_get().map(|entry| entry.url.clone());
                    if let Some(url) = next_url {
                        let new_id = self.next_id;
                        let replacement = self.build_worker(new_id, url, worker.range_ctl().clone());
                        info!("worker {} retired, worker {} takes over its range", id, new_id);
                        self.insert_worker(replacement.clone(), false);
                        supervision.insert(new_id, Supervision { reloaded: true, ..Default::default() });
                        tasks.push(Self::spawn(replacement));
                        return;
                    }
                }

                warn!("worker {} permanently failed: {}", id, err);
            }
        }
    }

    fn on_tick(
        &mut self,
        supervision: &mut HashMap<usize, Supervision>,
        tasks: &mut FuturesUnordered<WorkerTask>,
    ) {
        let millis = self.config.tick_interval.as_millis().max(1) as u64;
        for worker in self.workers.values() {
            let window = worker.drain_speed_window();
            worker.set_speed(window * 1000 / millis);
        }
        self.status.tick(self.config.tick_interval);
        self.flush_checkpoint();

        let observed: Vec<(usize, u64, WorkerState)> = self
            .workers
            .iter()
            .map(|(id, worker)| (*id, worker.range_ctl().current(), worker.state()))
            .collect();

        let progressed_any = observed.iter().any(|(id, current, _)| {
            supervision
                .get(id)
                .map(|entry| *current > entry.last_current)
                .unwrap_or(true)
        });

        let mut stalled = Vec::new();
        for (id, current, state) in &observed {
            let entry = supervision.entry(*id).or_default();
            let active = matches!(state, WorkerState::Fetching | WorkerState::Writing);
            if active && *current == entry.last_current && progressed_any {
                entry.stall_ticks += 1;
                if entry.stall_ticks >= self.config.stall_ticks {
                    stalled.push(*id);
                }
            } else {
                entry.stall_ticks = 0;
            }
            entry.last_current = *current;
        }

        for id in stalled {
            self.try_steal(id, supervision, tasks);
        }
    }

    /// Work-stealing: hand the tail half of a stalled assignment to a new
    /// worker on a different URL. The source worker's `end` shrinks.
    fn try_steal(
        &mut self,
        id: usize,
        supervision: &mut HashMap<usize, Supervision>,
        tasks: &mut FuturesUnordered<WorkerTask>,
    ) {
        let worker = match self.workers.get(&id) {
            Some(worker) => worker.clone(),
            None => return,
        };
        let url = match self.url_pool.sequential_get() {
            Some(entry) => entry.url.clone(),
            None => return,
        };
        let stolen = match worker.range_ctl().steal_tail(self.config.min_parallel_size) {
            Some(stolen) => stolen,
            None => return,
        };

        let new_id = self.next_id;
        let thief = self.build_worker(new_id, url, RangeCtl::new(stolen));
        info!(
            "stalled worker {} split at byte {}, worker {} takes the tail",
            id, stolen.begin, new_id
        );
        self.insert_worker(thief.clone(), true);
        supervision.insert(new_id, Supervision::default());
        if let Some(entry) = supervision.get_mut(&id) {
            entry.stall_ticks = 0;
        }
        tasks.push(Self::spawn(thief));
    }

    fn all_complete(&self) -> bool {
        self.ranges.iter().all(|range| range.is_complete())
    }

    fn flush_checkpoint(&self) {
        let state = match &self.instance_state {
            Some(state) => state,
            None => return,
        };
        let mut ranges: Vec<Range> = self.ranges.iter().map(|ctl| ctl.snapshot()).collect();
        ranges.sort_by_key(|range| range.begin);
        let instance = DownloadInstance {
            total_size: self.status.total_size(),
            ranges,
        };
        if let Err(err) = state.put(&instance) {
            warn!("checkpoint flush failed: {}", err);
        }
    }
}
