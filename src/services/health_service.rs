//! Health Service
//!
//! Warm-up progress and store statistics for `GET /health`.

use crate::cache::CacheStats;
use crate::datasets::{DatasetKey, DatasetKind, DatasetState, LoadStatus, SeriesKind, SeriesStatus};
use crate::db::duckdb::guard::GuardState;
use crate::db::duckdb::schema::TableName;
use crate::error::AppError;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use chrono_tz::Europe::Paris;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::warn;

/// Per-dataset health entry
#[derive(Debug, Clone, Serialize)]
pub struct DatasetHealth {
    pub key: String,
    pub kind: DatasetKind,
    pub status: LoadStatus,
    pub row_count: usize,
    pub loaded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Empty for index-level datasets
    pub series: BTreeMap<SeriesKind, SeriesStatus>,
}

/// Health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ready` once every step is complete, else `warming_up`
    pub status: &'static str,
    pub all_ready: bool,
    pub progress: String,
    pub indices_loaded: usize,
    pub total_rows: String,
    pub total_memory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duckdb_memory: Option<String>,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<String>,
    pub datasets: Vec<DatasetHealth>,
    pub cache: CacheStats,
    pub store: GuardState,
}

/// Health service
pub struct HealthService;

impl HealthService {
    /// Build the health report.
    ///
    /// Reads only in-memory registries plus one pass over the store's table
    /// statistics, so it stays cheap while loads are running.
    pub async fn report(state: &AppState) -> HealthReport {
        let store = state.store.clone();
        let stats = match tokio::task::spawn_blocking(move || {
            Ok::<_, AppError>((store.table_stats()?, store.memory_usage().ok()))
        })
        .await
        {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                warn!("Store statistics unavailable: {}", e);
                None
            }
            Err(e) => {
                warn!("Store statistics task failed: {}", e);
                None
            }
        };
        let (tables, duckdb_memory) = stats.unwrap_or_default();

        let row_counts: HashMap<String, i64> = tables
            .iter()
            .map(|t| (t.table_name.clone(), t.row_count))
            .collect();
        let total_rows: i64 = tables.iter().map(|t| t.row_count).sum();
        let total_bytes: i64 = tables.iter().map(|t| t.estimated_size).sum();

        let states = state.registry.snapshot();
        let (steps, completed, total_steps) = Self::build_steps(state, &states, &row_counts);
        let all_ready = completed == total_steps;

        let datasets = state
            .catalog
            .all()
            .iter()
            .map(|dataset| {
                let current = states.get(&dataset.key);
                let series = if dataset.kind == DatasetKind::Index {
                    SeriesKind::ALL
                        .iter()
                        .map(|kind| (*kind, state.series.status(&dataset.key, *kind)))
                        .collect()
                } else {
                    BTreeMap::new()
                };
                DatasetHealth {
                    key: dataset.key.to_string(),
                    kind: dataset.kind,
                    status: current.map(|s| s.status).unwrap_or(LoadStatus::Unloaded),
                    row_count: current.map(|s| s.row_count).unwrap_or(0),
                    loaded_at: current.and_then(|s| s.loaded_at).map(fmt_cet),
                    last_error: current.and_then(|s| s.last_error.clone()),
                    series,
                }
            })
            .collect();

        let indices_loaded = state
            .catalog
            .of_kind(DatasetKind::Index)
            .filter(|d| states.get(&d.key).is_some_and(DatasetState::is_loaded))
            .count();

        let startup = state.startup_times();
        let (mut elapsed, mut total_time, mut loaded_at) = (None, None, None);
        match (startup.started_at, startup.finished_at) {
            (Some(start), Some(end)) if all_ready => {
                total_time = Some(fmt_time(end.duration_since(start)));
                loaded_at = startup.finished_wall.map(fmt_cet);
            }
            (Some(start), _) => elapsed = Some(fmt_time(Instant::now().duration_since(start))),
            _ => {}
        }

        HealthReport {
            status: if all_ready { "ready" } else { "warming_up" },
            all_ready,
            progress: format!("{}/{}", completed, total_steps),
            indices_loaded,
            total_rows: fmt_rows(total_rows),
            total_memory: if total_bytes > 0 {
                fmt_bytes(total_bytes)
            } else {
                "n/a".to_string()
            },
            duckdb_memory,
            steps,
            elapsed,
            total_time,
            loaded_at,
            datasets,
            cache: state.cache.stats(),
            store: state.store.guard().state(),
        }
    }

    /// Three steps per index dataset (stocks, sector series, industry
    /// series) plus one for index-level prices
    fn build_steps(
        state: &AppState,
        states: &HashMap<DatasetKey, DatasetState>,
        row_counts: &HashMap<String, i64>,
    ) -> (Vec<String>, usize, usize) {
        let indices: Vec<_> = state.catalog.of_kind(DatasetKind::Index).collect();
        let index_prices = state.catalog.index_prices();
        let total = indices.len() * 3 + usize::from(index_prices.is_some());

        let mut steps = Vec::with_capacity(total);
        let mut completed = 0;
        let mut push = |label: String, table: Option<TableName>, status: StepStatus| {
            let n = steps.len() + 1;
            let line = match status {
                StepStatus::Done => {
                    completed += 1;
                    match table.and_then(|t| row_counts.get(&t.to_string())) {
                        Some(rows) => format!("{}/{}: {} ({} rows) [ok]", n, total, label, fmt_thousands(*rows)),
                        None => format!("{}/{}: {} [ok]", n, total, label),
                    }
                }
                StepStatus::Running(verb) => format!("{}/{}: {} ... {}", n, total, label, verb),
                StepStatus::Failed => format!("{}/{}: {} - failed", n, total, label),
                StepStatus::Pending => format!("{}/{}: {} - pending", n, total, label),
            };
            steps.push(line);
        };

        for dataset in &indices {
            let key = &dataset.key;
            let load = states.get(key).map(|s| s.status).unwrap_or(LoadStatus::Unloaded);
            push(
                format!("stocks for {}", key),
                Some(TableName::Prices(key.clone())),
                StepStatus::from_load(load),
            );

            for (kind, table) in [
                (SeriesKind::Sector, TableName::SectorSeries(key.clone())),
                (SeriesKind::Industry, TableName::IndustrySeries(key.clone())),
            ] {
                // Derived series never count as done while the parent is not loaded
                let status = if load == LoadStatus::Loaded {
                    StepStatus::from_series(state.series.status(key, kind))
                } else {
                    StepStatus::Pending
                };
                push(format!("{} for {}", kind.label(), key), Some(table), status);
            }
        }

        if let Some(dataset) = index_prices {
            let load = states
                .get(&dataset.key)
                .map(|s| s.status)
                .unwrap_or(LoadStatus::Unloaded);
            push(
                "index prices".to_string(),
                Some(TableName::IndexPrices),
                StepStatus::from_load(load),
            );
        }

        (steps, completed, total)
    }
}

enum StepStatus {
    Done,
    Running(&'static str),
    Failed,
    Pending,
}

impl StepStatus {
    fn from_load(status: LoadStatus) -> Self {
        match status {
            LoadStatus::Loaded => StepStatus::Done,
            LoadStatus::Loading => StepStatus::Running("loading"),
            LoadStatus::Failed => StepStatus::Failed,
            LoadStatus::Unloaded => StepStatus::Pending,
        }
    }

    fn from_series(status: SeriesStatus) -> Self {
        match status {
            SeriesStatus::Ready => StepStatus::Done,
            SeriesStatus::Computing => StepStatus::Running("computing"),
            SeriesStatus::Failed => StepStatus::Failed,
            SeriesStatus::Pending => StepStatus::Pending,
        }
    }
}

fn fmt_cet(at: DateTime<Utc>) -> String {
    at.with_timezone(&Paris).format("%d %b %Y %H:%M:%S %Z").to_string()
}

pub fn fmt_bytes(bytes: i64) -> String {
    let b = bytes as f64;
    if b >= 1_073_741_824.0 {
        format!("{:.1}Gb", b / 1_073_741_824.0)
    } else if b >= 1_048_576.0 {
        format!("{:.0}Mb", b / 1_048_576.0)
    } else if b >= 1024.0 {
        format!("{:.0}Kb", b / 1024.0)
    } else {
        format!("{}b", bytes)
    }
}

pub fn fmt_rows(n: i64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.0}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

pub fn fmt_time(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        let minutes = (secs / 60.0).floor() as u64;
        let rest = secs - minutes as f64 * 60.0;
        if rest >= 1.0 {
            format!("{}m{:.0}s", minutes, rest)
        } else {
            format!("{}m", minutes)
        }
    } else {
        format!("{:.0}s", secs)
    }
}

fn fmt_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::refresh::RefreshOrchestrator;
    use crate::state::testing::{memory_state, price_rows, seed};
    use chrono::TimeZone;

    #[test]
    fn test_formatters() {
        assert_eq!(fmt_bytes(512), "512b");
        assert_eq!(fmt_bytes(2048), "2Kb");
        assert_eq!(fmt_bytes(5 * 1_048_576), "5Mb");
        assert_eq!(fmt_bytes(3 * 1_073_741_824 / 2), "1.5Gb");

        assert_eq!(fmt_rows(999), "999");
        assert_eq!(fmt_rows(12_400), "12k");
        assert_eq!(fmt_rows(2_500_000), "2.5M");

        assert_eq!(fmt_time(Duration::from_secs(42)), "42s");
        assert_eq!(fmt_time(Duration::from_secs(120)), "2m");
        assert_eq!(fmt_time(Duration::from_secs(125)), "2m5s");

        assert_eq!(fmt_thousands(500), "500");
        assert_eq!(fmt_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_cet_timestamp() {
        let winter = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(fmt_cet(winter), "15 Jan 2024 13:00:00 CET");
        let summer = Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(fmt_cet(summer), "15 Jul 2024 14:00:00 CEST");
    }

    #[tokio::test]
    async fn test_report_before_any_load() {
        let (state, _warehouse, _rx) = memory_state(&["idxa", "idxb"]);
        let report = HealthService::report(&state).await;

        assert_eq!(report.status, "warming_up");
        assert!(!report.all_ready);
        assert_eq!(report.progress, "0/7");
        assert_eq!(report.steps.len(), 7);
        assert_eq!(report.steps[0], "1/7: stocks for idxa - pending");
        assert_eq!(report.steps[6], "7/7: index prices - pending");
        assert_eq!(report.indices_loaded, 0);
        assert_eq!(report.total_memory, "n/a");
        assert!(report.elapsed.is_none());
        assert_eq!(report.datasets.len(), 3);
    }

    #[tokio::test]
    async fn test_report_after_startup_preload() {
        let (state, warehouse, rx) = memory_state(&["idxa"]);
        seed(&warehouse, "idxa", price_rows("idxa", 4, 300));
        warehouse.insert_table(
            "test.stock_exchange.index_prices",
            crate::warehouse::WarehouseBatch::IndexPrices(vec![
                crate::db::duckdb::models::IndexPriceRow {
                    symbol: "^GSPC".to_string(),
                    name: "S&P 500".to_string(),
                    currency: "USD".to_string(),
                    exchange: "SNP".to_string(),
                    trade_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    open: 4700.0,
                    close: 4742.8,
                    high: 4754.3,
                    low: 4697.2,
                    volume: 3_000_000,
                },
            ]),
        );
        RefreshOrchestrator::spawn_workers(state.clone(), rx, 2);
        RefreshOrchestrator::startup_preload(state.clone()).await;

        let report = HealthService::report(&state).await;
        assert_eq!(report.status, "ready", "steps: {:?}", report.steps);
        assert_eq!(report.progress, "4/4");
        assert_eq!(report.steps[0], "1/4: stocks for idxa (1,200 rows) [ok]");
        assert!(report.steps[3].starts_with("4/4: index prices (1 rows) [ok]"));
        assert_eq!(report.indices_loaded, 1);
        assert!(report.total_time.is_some());
        assert!(report.loaded_at.is_some());
        assert!(report.elapsed.is_none());

        let idxa = &report.datasets[0];
        assert_eq!(idxa.status, LoadStatus::Loaded);
        assert_eq!(idxa.row_count, 1200);
        assert_eq!(idxa.series[&SeriesKind::Sector], SeriesStatus::Ready);
        assert!(report.datasets[1].series.is_empty());
    }
}
