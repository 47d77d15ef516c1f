//! In-process warehouse
//!
//! Serves tables registered up front. Counts fetches and can be told to fail
//! or to respond slowly, which makes load choreography observable in tests
//! and lets the service run locally without cloud credentials.

use super::{Warehouse, WarehouseBatch};
use crate::datasets::DatasetKind;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: RwLock<HashMap<String, WarehouseBatch>>,
    failing: RwLock<HashSet<String>>,
    delay: RwLock<Option<Duration>>,
    fetches: RwLock<HashMap<String, usize>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the rows served for `locator`
    pub fn insert_table(&self, locator: impl Into<String>, batch: WarehouseBatch) {
        self.tables.write().insert(locator.into(), batch);
    }

    /// Make every fetch of `locator` fail until cleared
    pub fn set_failing(&self, locator: impl Into<String>, failing: bool) {
        let locator = locator.into();
        let mut set = self.failing.write();
        if failing {
            set.insert(locator);
        } else {
            set.remove(&locator);
        }
    }

    /// Delay applied to every fetch
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.read().get(locator).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn total_fetches(&self) -> usize {
        self.fetches.read().values().sum()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_all_rows(&self, locator: &str, kind: DatasetKind) -> Result<WarehouseBatch> {
        *self.fetches.write().entry(locator.to_string()).or_insert(0) += 1;

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.read().contains(locator) {
            return Err(AppError::Warehouse(format!("{} is unavailable", locator)));
        }

        let batch = self.tables.read().get(locator).cloned();
        match batch {
            Some(batch) if batch.kind() == kind => Ok(batch),
            Some(_) => Err(AppError::Warehouse(format!(
                "{} does not hold {:?} rows",
                locator, kind
            ))),
            None => Ok(WarehouseBatch::empty(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_counts_and_failures() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_table("p.d.idxa", WarehouseBatch::Prices(Vec::new()));

        let batch = warehouse.fetch_all_rows("p.d.idxa", DatasetKind::Index).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(warehouse.fetch_count("p.d.idxa"), 1);

        warehouse.set_failing("p.d.idxa", true);
        assert!(warehouse.fetch_all_rows("p.d.idxa", DatasetKind::Index).await.is_err());
        assert_eq!(warehouse.fetch_count("p.d.idxa"), 2);

        assert!(warehouse
            .fetch_all_rows("p.d.idxa", DatasetKind::IndexPrices)
            .await
            .is_err());

        let missing = warehouse.fetch_all_rows("p.d.nope", DatasetKind::IndexPrices).await.unwrap();
        assert_eq!(missing.kind(), DatasetKind::IndexPrices);
        assert_eq!(warehouse.total_fetches(), 4);
    }
}
