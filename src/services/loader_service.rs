//! Loader Service
//!
//! Pulls one dataset from the warehouse and swaps it into the store.
//! Never returns an error: every failure is logged and folded into the
//! [`LoadOutcome`] so the worker can record it in the registry.

use crate::datasets::{DatasetConfig, DatasetKey, DatasetKind};
use crate::db::duckdb::models::{IndexPriceRow, PriceRow};
use crate::state::AppState;
use crate::warehouse::WarehouseBatch;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a load produced no data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("warehouse unavailable: {0}")]
    SourceUnavailable(String),

    #[error("warehouse returned no usable rows")]
    EmptyResult,

    #[error("table swap failed: {0}")]
    Store(String),
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::SourceUnavailable(_) => "source_unavailable",
            LoadError::EmptyResult => "empty_result",
            LoadError::Store(_) => "store",
        }
    }
}

/// Result of one load attempt
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub row_count: usize,
    pub error: Option<LoadError>,
}

impl LoadOutcome {
    fn loaded(row_count: usize) -> Self {
        Self {
            row_count,
            error: None,
        }
    }

    fn failed(error: LoadError) -> Self {
        Self {
            row_count: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.row_count > 0
    }
}

/// A daily row keyed by (symbol, trade_date)
pub trait DailyRow {
    fn symbol(&self) -> &str;
    fn trade_date(&self) -> NaiveDate;
    fn volume(&self) -> i64;
    /// Total order over the remaining fields, used only to break volume ties
    fn cmp_content(&self, other: &Self) -> Ordering;
}

impl DailyRow for PriceRow {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    fn volume(&self) -> i64 {
        self.volume
    }

    fn cmp_content(&self, other: &Self) -> Ordering {
        self.close
            .total_cmp(&other.close)
            .then(self.open.total_cmp(&other.open))
            .then(self.high.total_cmp(&other.high))
            .then(self.low.total_cmp(&other.low))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.sector.cmp(&other.sector))
            .then_with(|| self.industry.cmp(&other.industry))
    }
}

impl DailyRow for IndexPriceRow {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    fn volume(&self) -> i64 {
        self.volume
    }

    fn cmp_content(&self, other: &Self) -> Ordering {
        self.close
            .total_cmp(&other.close)
            .then(self.open.total_cmp(&other.open))
            .then(self.high.total_cmp(&other.high))
            .then(self.low.total_cmp(&other.low))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.currency.cmp(&other.currency))
            .then_with(|| self.exchange.cmp(&other.exchange))
    }
}

/// Keep the highest-volume row per (symbol, trade_date).
///
/// The result is sorted by (symbol, trade_date) and does not depend on the
/// input order.
pub fn dedup_highest_volume<T: DailyRow>(mut rows: Vec<T>) -> Vec<T> {
    rows.sort_by(|a, b| {
        a.symbol()
            .cmp(b.symbol())
            .then(a.trade_date().cmp(&b.trade_date()))
            .then(b.volume().cmp(&a.volume()))
            .then_with(|| b.cmp_content(a))
    });
    rows.dedup_by(|later, kept| {
        later.symbol() == kept.symbol() && later.trade_date() == kept.trade_date()
    });
    rows
}

/// Trim text, stamp the dataset key, drop rows without a symbol or finite close
fn normalize_price_rows(key: &DatasetKey, rows: Vec<PriceRow>) -> Vec<PriceRow> {
    rows.into_iter()
        .filter_map(|mut row| {
            row.symbol = row.symbol.trim().to_string();
            if row.symbol.is_empty() || !row.close.is_finite() {
                return None;
            }
            row.name = row.name.trim().to_string();
            row.sector = row.sector.trim().to_string();
            row.industry = row.industry.trim().to_string();
            row.dataset_key = key.to_string();
            Some(row)
        })
        .collect()
}

fn normalize_index_price_rows(rows: Vec<IndexPriceRow>) -> Vec<IndexPriceRow> {
    rows.into_iter()
        .filter_map(|mut row| {
            row.symbol = row.symbol.trim().to_string();
            if row.symbol.is_empty() || !row.close.is_finite() {
                return None;
            }
            row.name = row.name.trim().to_string();
            Some(row)
        })
        .collect()
}

/// Dataset loader
pub struct DatasetLoader;

impl DatasetLoader {
    /// Fetch `dataset` and replace its tables.
    ///
    /// The unified views are rebuilt over this dataset plus every index
    /// dataset `Loaded` at the moment of the swap.
    pub async fn load_dataset(state: &AppState, dataset: &DatasetConfig) -> LoadOutcome {
        let key = dataset.key.clone();
        let started = Instant::now();

        let Some(locator) = dataset.source_locator.as_deref() else {
            warn!("[{}] No warehouse table configured", key);
            return LoadOutcome::failed(LoadError::SourceUnavailable(
                "no warehouse table configured".to_string(),
            ));
        };

        let batch = match state.warehouse.fetch_all_rows(locator, dataset.kind).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("[{}] Warehouse fetch failed: {}", key, e);
                return LoadOutcome::failed(LoadError::SourceUnavailable(e.to_string()));
            }
        };

        let fetched = batch.len();
        info!(
            "[{}] Warehouse fetch: {:.1}s ({} raw rows)",
            key,
            started.elapsed().as_secs_f64(),
            fetched
        );

        if batch.is_empty() {
            warn!("[{}] Warehouse returned no rows, keeping previous tables", key);
            return LoadOutcome::failed(LoadError::EmptyResult);
        }

        let store = state.store.clone();
        let swap_key = key.clone();
        let view_members = Self::view_members(state);
        let swap = tokio::task::spawn_blocking(move || match batch {
            WarehouseBatch::Prices(rows) => {
                let rows = dedup_highest_volume(normalize_price_rows(&swap_key, rows));
                if rows.is_empty() {
                    return Ok(0);
                }
                store.replace_index_dataset(&swap_key, &rows, view_members)
            }
            WarehouseBatch::IndexPrices(rows) => {
                let rows = dedup_highest_volume(normalize_index_price_rows(rows));
                if rows.is_empty() {
                    return Ok(0);
                }
                store.replace_index_prices(&rows)
            }
        })
        .await;

        match swap {
            Ok(Ok(0)) => {
                warn!("[{}] No usable rows among {} fetched", key, fetched);
                LoadOutcome::failed(LoadError::EmptyResult)
            }
            Ok(Ok(row_count)) => {
                info!(
                    "[{}] Loaded {} rows ({} duplicates dropped) in {:.1}s",
                    key,
                    row_count,
                    fetched.saturating_sub(row_count),
                    started.elapsed().as_secs_f64()
                );
                LoadOutcome::loaded(row_count)
            }
            Ok(Err(e)) => {
                error!("[{}] Table swap failed: {}", key, e);
                LoadOutcome::failed(LoadError::Store(e.to_string()))
            }
            Err(e) => {
                error!("[{}] Table swap task failed: {}", key, e);
                LoadOutcome::failed(LoadError::Store(e.to_string()))
            }
        }
    }

    /// Members of the unified views: index datasets currently `Loaded`.
    ///
    /// Returned as a closure so the store can evaluate it under write access.
    pub fn view_members(state: &AppState) -> impl Fn() -> Vec<DatasetKey> + Send + 'static {
        let registry = state.registry.clone();
        let index_keys: Vec<DatasetKey> = state
            .catalog
            .of_kind(DatasetKind::Index)
            .map(|d| d.key.clone())
            .collect();
        move || {
            registry
                .loaded_keys()
                .into_iter()
                .filter(|k| index_keys.contains(k))
                .collect()
        }
    }
}
