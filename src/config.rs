//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `dashboard.toml`, then `DASHBOARD_*` environment variables. A `.env`
//! file is read first so its values land in the environment layer.

use crate::datasets::{DatasetCatalog, DatasetConfig, DatasetKey, DatasetKind, INDEX_PRICES_KEY};
use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DATASETS: [&str; 6] = ["stoxx50", "sp500", "ftse100", "nikkei225", "csi300", "nifty50"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    Bigquery,
    /// Empty in-process warehouse, for running without cloud access
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    pub log_filter: String,

    // Warehouse
    pub warehouse: WarehouseBackend,
    pub project_id: String,
    pub bigquery_dataset: String,
    /// Fixed bearer token; unset means Application Default Credentials
    pub bigquery_access_token: Option<String>,
    pub warehouse_timeout_secs: u64,

    // Datasets
    pub datasets: Vec<String>,
    pub priority_datasets: Vec<String>,
    /// Empty disables the index-level dataset
    pub index_prices_table: String,

    // Cache and workers
    pub cache_ttl_secs: u64,
    pub worker_count: usize,
    pub preload_pause_ms: u64,
    pub startup_preload: bool,
}

impl AppConfig {
    /// Load from `dashboard.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::load_from(None)
    }

    /// Load with an explicit configuration file instead of `dashboard.toml`
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("bind_address", "0.0.0.0:8000")?
            .set_default("log_filter", "market_dashboard=info,tower_http=info")?
            .set_default("warehouse", "bigquery")?
            .set_default("project_id", "")?
            .set_default("bigquery_dataset", "stock_exchange")?
            .set_default("warehouse_timeout_secs", 300)?
            .set_default("datasets", DEFAULT_DATASETS.to_vec())?
            .set_default("priority_datasets", vec!["stoxx50", "sp500"])?
            .set_default("index_prices_table", "index_prices")?
            .set_default("cache_ttl_secs", 1800)?
            .set_default("worker_count", 2)?
            .set_default("preload_pause_ms", 1000)?
            .set_default("startup_preload", true)?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("dashboard").required(false)),
        };

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix("DASHBOARD")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("datasets")
                    .with_list_parse_key("priority_datasets"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(AppError::Config("worker_count must be at least 1".to_string()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(AppError::Config("cache_ttl_secs must be positive".to_string()));
        }
        if self.warehouse == WarehouseBackend::Bigquery && self.project_id.is_empty() {
            tracing::warn!("project_id is empty; every warehouse fetch will fail");
        }

        let catalog = self.catalog()?;
        for key in &self.priority_datasets {
            let known = catalog
                .get(&DatasetKey::new(key.as_str())?)
                .is_some_and(|d| d.kind == DatasetKind::Index);
            if !known {
                return Err(AppError::Config(format!(
                    "Priority dataset {} is not a configured index",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Dataset catalog in preload order: indices as configured, then index prices
    pub fn catalog(&self) -> Result<DatasetCatalog> {
        let mut datasets = Vec::with_capacity(self.datasets.len() + 1);

        for raw in &self.datasets {
            let key = DatasetKey::new(raw.as_str())
                .map_err(|e| AppError::Config(e.to_string()))?;
            if key.as_str() == INDEX_PRICES_KEY || datasets.iter().any(|d: &DatasetConfig| d.key == key) {
                return Err(AppError::Config(format!("Duplicate or reserved dataset key: {}", key)));
            }
            datasets.push(DatasetConfig {
                source_locator: Some(self.table_locator(&format!("{}_prices", key))),
                key,
                kind: DatasetKind::Index,
            });
        }

        if !self.index_prices_table.is_empty() {
            datasets.push(DatasetConfig {
                key: DatasetKey::new(INDEX_PRICES_KEY)?,
                kind: DatasetKind::IndexPrices,
                source_locator: Some(self.table_locator(&self.index_prices_table)),
            });
        }

        Ok(DatasetCatalog::new(datasets))
    }

    /// Fully qualified `project.dataset.table` reference
    pub fn table_locator(&self, table: &str) -> String {
        if table.contains('.') {
            table.to_string()
        } else {
            format!("{}.{}.{}", self.project_id, self.bigquery_dataset, table)
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn preload_pause(&self) -> Duration {
        Duration::from_millis(self.preload_pause_ms)
    }

    pub fn warehouse_timeout(&self) -> Duration {
        Duration::from_secs(self.warehouse_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_and_file_overrides() {
        let file = write_config(
            r#"
            project_id = "my-project"
            datasets = ["sp500", "ftse100"]
            priority_datasets = ["sp500"]
            cache_ttl_secs = 60
            "#,
        );

        let config = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.preload_pause(), Duration::from_millis(1000));
        assert_eq!(config.warehouse, WarehouseBackend::Bigquery);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 3);
        let sp500 = catalog.resolve("sp500").unwrap();
        assert_eq!(
            sp500.source_locator.as_deref(),
            Some("my-project.stock_exchange.sp500_prices")
        );
        let index_prices = catalog.index_prices().unwrap();
        assert_eq!(
            index_prices.source_locator.as_deref(),
            Some("my-project.stock_exchange.index_prices")
        );
    }

    #[test]
    fn test_rejects_unknown_priority_dataset() {
        let file = write_config(
            r#"
            datasets = ["sp500"]
            priority_datasets = ["stoxx50"]
            "#,
        );
        assert!(matches!(
            AppConfig::load_from(Some(file.path())),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_dataset_key() {
        let file = write_config(
            r#"
            datasets = ["S&P 500"]
            priority_datasets = []
            "#,
        );
        assert!(AppConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_index_prices_can_be_disabled() {
        let file = write_config(
            r#"
            warehouse = "memory"
            index_prices_table = ""
            "#,
        );
        let config = AppConfig::load_from(Some(file.path())).unwrap();
        let catalog = config.catalog().unwrap();
        assert!(catalog.index_prices().is_none());
        assert_eq!(catalog.len(), 6);
    }
}
