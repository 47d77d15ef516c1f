//! Dataset catalog and load-state tracking
//!
//! A dataset is the unit of load, refresh and cache invalidation: one market
//! index's price history, or the global index-level price history.

pub mod registry;
pub mod series_status;

pub use registry::{DatasetState, LazyDecision, LoadStateRegistry, LoadStatus, RefreshDecision};
pub use series_status::{SeriesKind, SeriesStatus, SeriesStatusRegistry};

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of the global index-level prices dataset
pub const INDEX_PRICES_KEY: &str = "index_prices";

/// Stable dataset identifier.
///
/// Restricted to lowercase ASCII letters, digits and `_` because it is
/// embedded in DuckDB table names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DatasetKey(String);

impl DatasetKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let valid = !key.is_empty()
            && key.len() <= 48
            && key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && key.chars().next().is_some_and(|c| c.is_ascii_lowercase());

        if !valid {
            return Err(AppError::Validation(format!("Invalid dataset key: {:?}", key)));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DatasetKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DatasetKey::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Row shape of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Per-index constituent prices (symbol, sector, industry, OHLCV)
    Index,
    /// Index-level prices (symbol, currency, exchange, OHLCV)
    IndexPrices,
}

/// Static configuration of one dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetConfig {
    pub key: DatasetKey,
    pub kind: DatasetKind,
    /// Warehouse table reference (`project.dataset.table`)
    pub source_locator: Option<String>,
}

/// All datasets known to the process, in preload order
#[derive(Debug, Clone, Default)]
pub struct DatasetCatalog {
    datasets: Vec<DatasetConfig>,
}

impl DatasetCatalog {
    pub fn new(datasets: Vec<DatasetConfig>) -> Self {
        Self { datasets }
    }

    pub fn get(&self, key: &DatasetKey) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| &d.key == key)
    }

    /// Resolve a raw key from a request
    pub fn resolve(&self, raw: &str) -> Result<&DatasetConfig> {
        self.datasets
            .iter()
            .find(|d| d.key.as_str() == raw)
            .ok_or_else(|| AppError::NotFound(format!("Unknown dataset: {}", raw)))
    }

    pub fn all(&self) -> &[DatasetConfig] {
        &self.datasets
    }

    pub fn of_kind(&self, kind: DatasetKind) -> impl Iterator<Item = &DatasetConfig> {
        self.datasets.iter().filter(move |d| d.kind == kind)
    }

    pub fn index_prices(&self) -> Option<&DatasetConfig> {
        self.of_kind(DatasetKind::IndexPrices).next()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
