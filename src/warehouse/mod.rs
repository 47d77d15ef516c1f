//! Warehouse adapters
//!
//! The warehouse is the system of record. The cache only ever asks it for
//! every row of one table.

pub mod bigquery;
pub mod memory;

pub use bigquery::BigQueryWarehouse;
pub use memory::MemoryWarehouse;

use crate::config::{AppConfig, WarehouseBackend};
use crate::datasets::DatasetKind;
use crate::db::duckdb::models::{IndexPriceRow, PriceRow};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Rows fetched for one dataset, shaped by its kind
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseBatch {
    Prices(Vec<PriceRow>),
    IndexPrices(Vec<IndexPriceRow>),
}

impl WarehouseBatch {
    pub fn empty(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Index => WarehouseBatch::Prices(Vec::new()),
            DatasetKind::IndexPrices => WarehouseBatch::IndexPrices(Vec::new()),
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match self {
            WarehouseBatch::Prices(_) => DatasetKind::Index,
            WarehouseBatch::IndexPrices(_) => DatasetKind::IndexPrices,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WarehouseBatch::Prices(rows) => rows.len(),
            WarehouseBatch::IndexPrices(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of dataset rows
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch every row of the table at `locator` in one bulk query
    async fn fetch_all_rows(&self, locator: &str, kind: DatasetKind) -> Result<WarehouseBatch>;
}

/// Build the warehouse selected by configuration
pub fn warehouse_from_config(config: &AppConfig) -> Result<Arc<dyn Warehouse>> {
    match config.warehouse {
        WarehouseBackend::Bigquery => Ok(Arc::new(BigQueryWarehouse::new(
            config.project_id.clone(),
            config.bigquery_access_token.clone(),
            config.warehouse_timeout(),
        )?)),
        WarehouseBackend::Memory => {
            tracing::warn!("Using the in-memory warehouse: datasets will load empty");
            Ok(Arc::new(MemoryWarehouse::new()))
        }
    }
}
