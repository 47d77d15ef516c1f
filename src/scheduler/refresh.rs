//! Refresh orchestrator
//!
//! Owns the dataset lifecycle: the startup preload, lazy loads triggered by
//! queries, and explicit refreshes. Triggers move the registry to `Loading`
//! and queue a [`LoadJob`]; a fixed pool of workers drains the queue. At most
//! one job per dataset is ever in flight because only the trigger that wins
//! the registry transition queues one.

use crate::datasets::{DatasetKey, DatasetKind, LazyDecision, RefreshDecision};
use crate::services::loader_service::DatasetLoader;
use crate::services::series_service::SeriesService;
use crate::state::{AppState, JobReceiver};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What started a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTrigger {
    Startup,
    Lazy,
    Refresh,
}

/// Unit of work for the worker pool
#[derive(Debug)]
pub struct LoadJob {
    pub id: Uuid,
    pub key: DatasetKey,
    pub trigger: LoadTrigger,
    pub generation: u64,
    /// Answered with the report once the job finishes
    pub done: Option<oneshot::Sender<LoadReport>>,
}

/// Outcome of one finished job
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub job_id: Uuid,
    pub key: DatasetKey,
    pub trigger: LoadTrigger,
    pub generation: u64,
    pub row_count: usize,
    pub error: Option<String>,
    pub series_ready: usize,
    pub cache_entries_invalidated: usize,
    pub elapsed_ms: u64,
}

/// Target of an explicit refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    All,
    Dataset(String),
}

impl RefreshTarget {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "all" => RefreshTarget::All,
            key => RefreshTarget::Dataset(key.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Accepted,
    Skipped,
    Error,
}

/// Immediate answer to a refresh request
#[derive(Debug, Clone, Serialize)]
pub struct RefreshAck {
    pub status: RefreshStatus,
    pub message: String,
    /// Datasets whose refresh was started
    pub datasets: Vec<String>,
}

impl RefreshAck {
    fn new(status: RefreshStatus, message: impl Into<String>, datasets: Vec<String>) -> Self {
        Self {
            status,
            message: message.into(),
            datasets,
        }
    }
}

/// Load orchestration
pub struct RefreshOrchestrator;

impl RefreshOrchestrator {
    /// Start `count` workers draining the job queue
    pub fn spawn_workers(state: Arc<AppState>, receiver: JobReceiver, count: usize) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(receiver));
        (0..count.max(1))
            .map(|id| tokio::spawn(Self::worker_loop(id, state.clone(), receiver.clone())))
            .collect()
    }

    async fn worker_loop(id: usize, state: Arc<AppState>, receiver: Arc<Mutex<JobReceiver>>) {
        debug!("Load worker {} started", id);
        loop {
            let job = receiver.lock().await.recv().await;
            let Some(job) = job else {
                debug!("Load worker {} stopping: queue closed", id);
                break;
            };

            let key = job.key.clone();
            let task_state = state.clone();
            let result = tokio::spawn(async move { Self::run_job(&task_state, job).await }).await;

            if let Err(e) = result {
                error!("[{}] Load job panicked: {}", key, e);
                state.registry.mark_failed(&key, format!("load job panicked: {}", e));
            }
        }
    }

    /// Execute one job: swap tables, update the registry, rebuild derived
    /// series, invalidate and re-warm the cache.
    pub async fn run_job(state: &AppState, job: LoadJob) -> LoadReport {
        let started = Instant::now();
        let key = job.key.clone();

        // Serializes jobs for one dataset, including their precompute tail
        let lock = state.job_lock(&key);
        let _held = lock.lock().await;

        info!("[{}] Load started ({:?}, job {})", key, job.trigger, job.id);

        let mut row_count = 0;
        let mut error_text = None;
        let mut series_ready = 0;
        let mut prewarm = false;

        match state.catalog.get(&key).cloned() {
            None => {
                let reason = "dataset is not configured".to_string();
                state.registry.mark_failed(&key, reason.clone());
                error_text = Some(reason);
            }
            Some(dataset) => {
                let outcome = DatasetLoader::load_dataset(state, &dataset).await;
                let is_index = dataset.kind == DatasetKind::Index;

                if outcome.is_success() {
                    row_count = outcome.row_count;
                    state.registry.mark_loaded(&key, row_count);
                    if is_index {
                        // Sibling jobs may have swapped while this one was loading
                        Self::rebuild_views(state).await;
                        series_ready = SeriesService::precompute_all(state, &key, job.generation).await;
                        prewarm = true;
                    }
                } else {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no rows loaded".to_string());
                    state.registry.mark_failed(&key, reason.clone());
                    error_text = Some(reason);
                    if is_index {
                        Self::rebuild_views(state).await;
                    }
                }
            }
        }

        // Warm entries must be written after the final invalidation
        let invalidated = state.cache.invalidate_containing(key.as_str());
        if prewarm {
            SeriesService::prewarm(state, &key).await;
        }

        Self::finish(job, started, row_count, error_text, series_ready, invalidated)
    }

    fn finish(
        job: LoadJob,
        started: Instant,
        row_count: usize,
        error: Option<String>,
        series_ready: usize,
        cache_entries_invalidated: usize,
    ) -> LoadReport {
        let report = LoadReport {
            job_id: job.id,
            key: job.key,
            trigger: job.trigger,
            generation: job.generation,
            row_count,
            error,
            series_ready,
            cache_entries_invalidated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        match &report.error {
            None => info!(
                "[{}] Load finished: {} rows in {}ms",
                report.key, report.row_count, report.elapsed_ms
            ),
            Some(e) => warn!("[{}] Load failed after {}ms: {}", report.key, report.elapsed_ms, e),
        }

        if let Some(done) = job.done {
            let _ = done.send(report.clone());
        }
        report
    }

    /// Point the unified views at the index datasets `Loaded` right now
    async fn rebuild_views(state: &AppState) {
        let members = DatasetLoader::view_members(state);
        let store = state.store.clone();

        match tokio::task::spawn_blocking(move || store.rebuild_unified_views(members)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Unified view rebuild failed: {}", e),
            Err(e) => error!("Unified view rebuild task failed: {}", e),
        }
    }

    /// Queue a load if the dataset is `Unloaded` or `Failed`; never waits
    pub fn ensure_loaded(state: &AppState, key: &DatasetKey) -> LazyDecision {
        Self::start_lazy(state, key, LoadTrigger::Lazy, None)
    }

    fn start_lazy(
        state: &AppState,
        key: &DatasetKey,
        trigger: LoadTrigger,
        done: Option<oneshot::Sender<LoadReport>>,
    ) -> LazyDecision {
        let id = Uuid::new_v4();
        let decision = state.registry.begin_lazy_load(key, id);
        match decision {
            LazyDecision::Started(generation) => {
                state.series.reset(key, generation);
                info!("[{}] Queuing {:?} load (generation {})", key, trigger, generation);
                Self::queue(state, id, key, trigger, generation, done);
            }
            LazyDecision::AlreadyLoading => debug!("[{}] Load already in flight", key),
            LazyDecision::Ready | LazyDecision::Unknown => {}
        }
        decision
    }

    fn queue(
        state: &AppState,
        id: Uuid,
        key: &DatasetKey,
        trigger: LoadTrigger,
        generation: u64,
        done: Option<oneshot::Sender<LoadReport>>,
    ) {
        let job = LoadJob {
            id,
            key: key.clone(),
            trigger,
            generation,
            done,
        };
        if !state.enqueue(job) {
            state.registry.mark_failed(key, "load queue closed");
        }
    }

    /// Refresh one dataset or every loaded dataset; returns immediately
    pub fn trigger_refresh(state: &AppState, target: RefreshTarget) -> RefreshAck {
        match target {
            RefreshTarget::All => {
                let loaded = state.registry.loaded_keys();
                if loaded.is_empty() {
                    return RefreshAck::new(RefreshStatus::Skipped, "No datasets loaded yet", Vec::new());
                }
                let started: Vec<String> = loaded
                    .iter()
                    .filter(|key| matches!(Self::start_refresh(state, key, None), RefreshDecision::Started(_)))
                    .map(|key| key.to_string())
                    .collect();
                RefreshAck::new(
                    RefreshStatus::Accepted,
                    format!("Refreshing {} loaded datasets", started.len()),
                    started,
                )
            }
            RefreshTarget::Dataset(raw) => {
                let Ok(dataset) = state.catalog.resolve(&raw) else {
                    return RefreshAck::new(RefreshStatus::Error, format!("Unknown dataset: {}", raw), Vec::new());
                };
                let key = dataset.key.clone();
                match Self::start_refresh(state, &key, None) {
                    RefreshDecision::Started(_) => RefreshAck::new(
                        RefreshStatus::Accepted,
                        format!("Refreshing {}", key),
                        vec![key.to_string()],
                    ),
                    RefreshDecision::AlreadyLoading => RefreshAck::new(
                        RefreshStatus::Skipped,
                        format!("{} is already loading", key),
                        Vec::new(),
                    ),
                    RefreshDecision::Unknown => RefreshAck::new(
                        RefreshStatus::Error,
                        format!("Unknown dataset: {}", key),
                        Vec::new(),
                    ),
                }
            }
        }
    }

    /// Refresh one dataset and wait for its report; `None` if not started
    pub async fn refresh_and_wait(state: &AppState, key: &DatasetKey) -> Option<LoadReport> {
        let (tx, rx) = oneshot::channel();
        match Self::start_refresh(state, key, Some(tx)) {
            RefreshDecision::Started(_) => rx.await.ok(),
            _ => None,
        }
    }

    fn start_refresh(
        state: &AppState,
        key: &DatasetKey,
        done: Option<oneshot::Sender<LoadReport>>,
    ) -> RefreshDecision {
        let id = Uuid::new_v4();
        let decision = state.registry.begin_refresh(key, id);
        match decision {
            RefreshDecision::Started(generation) => {
                let invalidated = state.cache.invalidate_containing(key.as_str());
                state.series.reset(key, generation);
                info!(
                    "[{}] Refresh queued (generation {}, {} cache entries dropped)",
                    key, generation, invalidated
                );
                Self::queue(state, id, key, LoadTrigger::Refresh, generation, done);
            }
            RefreshDecision::AlreadyLoading => {
                debug!("[{}] Refresh ignored: load already in flight", key)
            }
            RefreshDecision::Unknown => warn!("[{}] Refresh requested for unknown dataset", key),
        }
        decision
    }

    /// Preload every dataset: priority indices concurrently, the remaining
    /// indices one by one with a pause, index-level prices last.
    pub async fn startup_preload(state: Arc<AppState>) {
        state.mark_startup_begin();
        let started = Instant::now();
        info!("Startup preload started");

        let priority: Vec<DatasetKey> = state
            .config
            .priority_datasets
            .iter()
            .filter_map(|raw| state.catalog.resolve(raw).ok())
            .map(|d| d.key.clone())
            .collect();

        let waits: Vec<_> = priority
            .iter()
            .filter_map(|key| Self::start_startup_load(&state, key))
            .collect();
        join_all(waits).await;
        info!(
            "Priority datasets ready in {:.1}s: {:?}",
            started.elapsed().as_secs_f64(),
            priority.iter().map(|k| k.as_str()).collect::<Vec<_>>()
        );

        let remaining: Vec<DatasetKey> = state
            .catalog
            .of_kind(DatasetKind::Index)
            .filter(|d| !priority.contains(&d.key))
            .map(|d| d.key.clone())
            .collect();

        for key in remaining {
            if let Some(wait) = Self::start_startup_load(&state, &key) {
                let _ = wait.await;
            }
            tokio::time::sleep(state.config.preload_pause()).await;
        }

        if let Some(index_prices) = state.catalog.index_prices() {
            if let Some(wait) = Self::start_startup_load(&state, &index_prices.key) {
                let _ = wait.await;
            }
        }

        state.mark_startup_done();
        info!(
            "All datasets preloaded in {:.1}s",
            started.elapsed().as_secs_f64()
        );
    }

    fn start_startup_load(state: &AppState, key: &DatasetKey) -> Option<oneshot::Receiver<LoadReport>> {
        let (tx, rx) = oneshot::channel();
        match Self::start_lazy(state, key, LoadTrigger::Startup, Some(tx)) {
            LazyDecision::Started(_) => Some(rx),
            _ => None,
        }
    }
}
