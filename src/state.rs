//! Application state management

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::datasets::{DatasetCatalog, DatasetKey, LoadStateRegistry, SeriesStatusRegistry};
use crate::db::duckdb::DuckDb;
use crate::error::Result;
use crate::scheduler::refresh::LoadJob;
use crate::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Receiving half of the load job queue, consumed by the worker pool
pub type JobReceiver = mpsc::UnboundedReceiver<LoadJob>;

/// Startup preload timing, reported by the health endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupTimes {
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub finished_wall: Option<DateTime<Utc>>,
}

/// Application state shared by handlers, the orchestrator and workers
pub struct AppState {
    pub config: AppConfig,

    /// Datasets known to the process
    pub catalog: DatasetCatalog,

    /// Per-dataset load state
    pub registry: Arc<LoadStateRegistry>,

    /// Per-dataset derived series state
    pub series: SeriesStatusRegistry,

    /// In-memory DuckDB store
    pub store: Arc<DuckDb>,

    /// Serialized query responses
    pub cache: ResponseCache,

    /// System of record
    pub warehouse: Arc<dyn Warehouse>,

    jobs: mpsc::UnboundedSender<LoadJob>,
    job_locks: DashMap<DatasetKey, Arc<tokio::sync::Mutex<()>>>,
    startup: RwLock<StartupTimes>,
    loads_started: AtomicU64,
}

impl AppState {
    /// Create the state and the job queue the workers will drain
    pub fn new(config: AppConfig, warehouse: Arc<dyn Warehouse>) -> Result<(Self, JobReceiver)> {
        let catalog = config.catalog()?;
        let registry = LoadStateRegistry::new();
        for dataset in catalog.all() {
            registry.register(&dataset.key);
        }

        let store = Arc::new(DuckDb::open_in_memory()?);
        let cache = ResponseCache::new(config.cache_ttl());
        let (jobs, receiver) = mpsc::unbounded_channel();

        tracing::info!(
            "State initialized: {} datasets, cache TTL {}s, warehouse {}",
            catalog.len(),
            config.cache_ttl_secs,
            warehouse.name()
        );

        Ok((
            Self {
                config,
                catalog,
                registry: Arc::new(registry),
                series: SeriesStatusRegistry::new(),
                store,
                cache,
                warehouse,
                jobs,
                job_locks: DashMap::new(),
                startup: RwLock::new(StartupTimes::default()),
                loads_started: AtomicU64::new(0),
            },
            receiver,
        ))
    }

    /// Queue a load job; false if the worker pool has shut down
    pub(crate) fn enqueue(&self, job: LoadJob) -> bool {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
        match self.jobs.send(job) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Load queue closed, dropping job for {}", err.0.key);
                false
            }
        }
    }

    /// Lock held by a worker for the whole job on one dataset
    pub(crate) fn job_lock(&self, key: &DatasetKey) -> Arc<tokio::sync::Mutex<()>> {
        self.job_locks.entry(key.clone()).or_default().clone()
    }

    /// Number of load jobs queued since startup
    pub fn loads_started(&self) -> u64 {
        self.loads_started.load(Ordering::Relaxed)
    }

    pub fn startup_times(&self) -> StartupTimes {
        *self.startup.read()
    }

    pub(crate) fn mark_startup_begin(&self) {
        let mut startup = self.startup.write();
        startup.started_at = Some(Instant::now());
        startup.finished_at = None;
        startup.finished_wall = None;
    }

    pub(crate) fn mark_startup_done(&self) {
        let mut startup = self.startup.write();
        startup.finished_at = Some(Instant::now());
        startup.finished_wall = Some(Utc::now());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::WarehouseBackend;
    use crate::db::duckdb::models::PriceRow;
    use crate::warehouse::{MemoryWarehouse, WarehouseBatch};
    use chrono::{Duration, NaiveDate};

    pub fn test_config(datasets: &[&str]) -> AppConfig {
        AppConfig {
            bind_address: "127.0.0.1:0".to_string(),
            log_filter: "market_dashboard=debug".to_string(),
            warehouse: WarehouseBackend::Memory,
            project_id: "test".to_string(),
            bigquery_dataset: "stock_exchange".to_string(),
            bigquery_access_token: None,
            warehouse_timeout_secs: 5,
            datasets: datasets.iter().map(|s| s.to_string()).collect(),
            priority_datasets: Vec::new(),
            index_prices_table: "index_prices".to_string(),
            cache_ttl_secs: 1800,
            worker_count: 2,
            preload_pause_ms: 0,
            startup_preload: false,
        }
    }

    pub fn locator(key: &str) -> String {
        format!("test.stock_exchange.{}_prices", key)
    }

    pub fn memory_state(datasets: &[&str]) -> (Arc<AppState>, Arc<MemoryWarehouse>, JobReceiver) {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let (state, receiver) = AppState::new(test_config(datasets), warehouse.clone()).unwrap();
        (Arc::new(state), warehouse, receiver)
    }

    /// `symbols × days` rows; symbol `i` closes at `10 * (i + 1) + day`
    pub fn price_rows(key: &str, symbols: usize, days: usize) -> Vec<PriceRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let sectors = ["Technology", "Energy", "Health Care"];
        let mut rows = Vec::with_capacity(symbols * days);
        for i in 0..symbols {
            for d in 0..days {
                let close = 10.0 * (i as f64 + 1.0) + d as f64;
                rows.push(PriceRow {
                    symbol: format!("S{:03}", i),
                    name: format!("Stock {}", i),
                    sector: sectors[i % sectors.len()].to_string(),
                    industry: format!("Industry {}", i % 2),
                    trade_date: start + Duration::days(d as i64),
                    open: close,
                    close,
                    high: close,
                    low: close,
                    volume: 1000 + i as i64,
                    dataset_key: key.to_string(),
                });
            }
        }
        rows
    }

    pub fn seed(warehouse: &MemoryWarehouse, key: &str, rows: Vec<PriceRow>) {
        warehouse.insert_table(locator(key), WarehouseBatch::Prices(rows));
    }
}
