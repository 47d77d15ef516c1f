//! Per-dataset load state machine
//!
//! `Unloaded → Loading → Loaded`, or `Loading → Failed`. `Failed` behaves like
//! `Unloaded` for the next trigger. Every transition into `Loading` bumps the
//! dataset's generation so late results from an older load can be detected.

use super::DatasetKey;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Snapshot of one dataset's load state
#[derive(Debug, Clone, Serialize)]
pub struct DatasetState {
    pub status: LoadStatus,
    pub row_count: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub generation: u64,
    pub job_id: Option<Uuid>,
    pub last_error: Option<String>,
}

impl DatasetState {
    fn unloaded() -> Self {
        Self {
            status: LoadStatus::Unloaded,
            row_count: 0,
            loaded_at: None,
            generation: 0,
            job_id: None,
            last_error: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status == LoadStatus::Loaded
    }

    fn start(&mut self, job_id: Uuid) -> u64 {
        self.status = LoadStatus::Loading;
        self.generation += 1;
        self.job_id = Some(job_id);
        self.generation
    }
}

/// Outcome of a lazy-load check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyDecision {
    /// Dataset is loaded; proceed with the query
    Ready,
    /// A load is already in flight
    AlreadyLoading,
    /// A new load was started with this generation
    Started(u64),
    /// Dataset is not registered
    Unknown,
}

/// Outcome of an explicit refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Started(u64),
    AlreadyLoading,
    Unknown,
}

/// In-memory load-state registry
#[derive(Debug, Default)]
pub struct LoadStateRegistry {
    states: RwLock<HashMap<DatasetKey, DatasetState>>,
}

impl LoadStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset in `Unloaded` state (no-op if already present)
    pub fn register(&self, key: &DatasetKey) {
        self.states
            .write()
            .entry(key.clone())
            .or_insert_with(DatasetState::unloaded);
    }

    pub fn get_status(&self, key: &DatasetKey) -> Option<DatasetState> {
        self.states.read().get(key).cloned()
    }

    pub fn is_loaded(&self, key: &DatasetKey) -> bool {
        self.states
            .read()
            .get(key)
            .map(|s| s.is_loaded())
            .unwrap_or(false)
    }

    pub fn is_loading(&self, key: &DatasetKey) -> bool {
        self.states
            .read()
            .get(key)
            .map(|s| s.status == LoadStatus::Loading)
            .unwrap_or(false)
    }

    /// Current generation, 0 if never loaded
    pub fn generation(&self, key: &DatasetKey) -> u64 {
        self.states.read().get(key).map(|s| s.generation).unwrap_or(0)
    }

    /// Unconditionally enter `Loading`; returns the new generation
    pub fn mark_loading(&self, key: &DatasetKey, job_id: Uuid) -> u64 {
        let mut states = self.states.write();
        let state = states.entry(key.clone()).or_insert_with(DatasetState::unloaded);
        state.start(job_id)
    }

    /// Start a load only if the dataset is `Unloaded` or `Failed`
    pub fn begin_lazy_load(&self, key: &DatasetKey, job_id: Uuid) -> LazyDecision {
        let mut states = self.states.write();
        match states.get_mut(key) {
            None => LazyDecision::Unknown,
            Some(state) => match state.status {
                LoadStatus::Loaded => LazyDecision::Ready,
                LoadStatus::Loading => LazyDecision::AlreadyLoading,
                LoadStatus::Unloaded | LoadStatus::Failed => {
                    LazyDecision::Started(state.start(job_id))
                }
            },
        }
    }

    /// Start a load unless one is already in flight
    pub fn begin_refresh(&self, key: &DatasetKey, job_id: Uuid) -> RefreshDecision {
        let mut states = self.states.write();
        match states.get_mut(key) {
            None => RefreshDecision::Unknown,
            Some(state) if state.status == LoadStatus::Loading => RefreshDecision::AlreadyLoading,
            Some(state) => RefreshDecision::Started(state.start(job_id)),
        }
    }

    pub fn mark_loaded(&self, key: &DatasetKey, row_count: usize) {
        let mut states = self.states.write();
        let state = states.entry(key.clone()).or_insert_with(DatasetState::unloaded);
        state.status = LoadStatus::Loaded;
        state.row_count = row_count;
        state.loaded_at = Some(Utc::now());
        state.job_id = None;
        state.last_error = None;
    }

    pub fn mark_failed(&self, key: &DatasetKey, reason: impl Into<String>) {
        let mut states = self.states.write();
        let state = states.entry(key.clone()).or_insert_with(DatasetState::unloaded);
        state.status = LoadStatus::Failed;
        state.row_count = 0;
        state.job_id = None;
        state.last_error = Some(reason.into());
    }

    /// Keys currently `Loaded`, sorted for stable view definitions
    pub fn loaded_keys(&self) -> Vec<DatasetKey> {
        let mut keys: Vec<DatasetKey> = self
            .states
            .read()
            .iter()
            .filter(|(_, s)| s.is_loaded())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<DatasetKey, DatasetState> {
        self.states.read().clone()
    }
}
