//! Table naming and DDL for the analytical store
//!
//! Identifiers are only ever built from validated `DatasetKey`s. Rows are
//! written through DuckDB appenders, filters through bound parameters.

use crate::datasets::DatasetKey;
use std::fmt;

/// A table or view in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableName {
    Prices(DatasetKey),
    Latest(DatasetKey),
    SectorSeries(DatasetKey),
    IndustrySeries(DatasetKey),
    StockReturns(DatasetKey),
    IndexPrices,
    LatestIndexPrices,
    /// Union of all loaded `prices_*` tables
    UnifiedPrices,
    /// Union of all loaded `latest_*` tables
    UnifiedLatest,
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableName::Prices(k) => write!(f, "prices_{}", k),
            TableName::Latest(k) => write!(f, "latest_{}", k),
            TableName::SectorSeries(k) => write!(f, "sector_series_{}", k),
            TableName::IndustrySeries(k) => write!(f, "industry_series_{}", k),
            TableName::StockReturns(k) => write!(f, "stock_returns_{}", k),
            TableName::IndexPrices => f.write_str("index_prices"),
            TableName::LatestIndexPrices => f.write_str("latest_index_prices"),
            TableName::UnifiedPrices => f.write_str("prices"),
            TableName::UnifiedLatest => f.write_str("latest_prices"),
        }
    }
}

pub const PRICE_COLUMNS: &str =
    "symbol, name, sector, industry, trade_date, open, close, high, low, volume, dataset_key";

pub const INDEX_PRICE_COLUMNS: &str =
    "symbol, name, currency, exchange, trade_date, open, close, high, low, volume";

pub fn create_prices_table(table: &TableName) -> String {
    format!(
        "CREATE OR REPLACE TABLE {table} (
            symbol VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            sector VARCHAR NOT NULL,
            industry VARCHAR NOT NULL,
            trade_date DATE NOT NULL,
            open DOUBLE NOT NULL,
            close DOUBLE NOT NULL,
            high DOUBLE NOT NULL,
            low DOUBLE NOT NULL,
            volume BIGINT NOT NULL,
            dataset_key VARCHAR NOT NULL
        )"
    )
}

pub fn create_index_prices_table() -> String {
    format!(
        "CREATE OR REPLACE TABLE {} (
            symbol VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            currency VARCHAR NOT NULL,
            exchange VARCHAR NOT NULL,
            trade_date DATE NOT NULL,
            open DOUBLE NOT NULL,
            close DOUBLE NOT NULL,
            high DOUBLE NOT NULL,
            low DOUBLE NOT NULL,
            volume BIGINT NOT NULL
        )",
        TableName::IndexPrices
    )
}

/// Latest row per symbol plus the close of the row before it
pub fn create_latest_table(latest: &TableName, source: &TableName, columns: &str) -> String {
    format!(
        "CREATE OR REPLACE TABLE {latest} AS
         SELECT {columns}, prev_close,
                CASE WHEN prev_close IS NULL OR prev_close = 0 THEN NULL
                     ELSE (close - prev_close) / prev_close * 100 END AS change_pct
         FROM (
             SELECT {columns},
                    LAG(close) OVER (PARTITION BY symbol ORDER BY trade_date) AS prev_close,
                    ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY trade_date DESC) AS rn
             FROM {source}
         ) ranked
         WHERE rn = 1"
    )
}

pub fn create_sector_series_table(table: &TableName) -> String {
    format!(
        "CREATE OR REPLACE TABLE {table} (
            sector VARCHAR NOT NULL,
            time DATE NOT NULL,
            pct DOUBLE NOT NULL,
            stock_count BIGINT NOT NULL
        )"
    )
}

pub fn create_industry_series_table(table: &TableName) -> String {
    format!(
        "CREATE OR REPLACE TABLE {table} (
            sector VARCHAR NOT NULL,
            industry VARCHAR NOT NULL,
            time DATE NOT NULL,
            pct DOUBLE NOT NULL,
            stock_count BIGINT NOT NULL
        )"
    )
}

pub fn create_stock_returns_table(table: &TableName) -> String {
    format!(
        "CREATE OR REPLACE TABLE {table} (
            symbol VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            sector VARCHAR NOT NULL,
            industry VARCHAR NOT NULL,
            period VARCHAR NOT NULL,
            start_date DATE NOT NULL,
            end_date DATE NOT NULL,
            start_close DOUBLE NOT NULL,
            end_close DOUBLE NOT NULL,
            return_pct DOUBLE NOT NULL
        )"
    )
}

/// `CREATE VIEW` statements for the unified views, empty if nothing is loaded
pub fn create_unified_views(keys: &[DatasetKey]) -> Vec<String> {
    if keys.is_empty() {
        return Vec::new();
    }

    let union_of = |make: fn(DatasetKey) -> TableName| {
        keys.iter()
            .map(|k| format!("SELECT * FROM {}", make(k.clone())))
            .collect::<Vec<_>>()
            .join(" UNION ALL ")
    };

    vec![
        format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            TableName::UnifiedPrices,
            union_of(TableName::Prices)
        ),
        format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            TableName::UnifiedLatest,
            union_of(TableName::Latest)
        ),
    ]
}

pub fn drop_unified_views() -> String {
    format!(
        "DROP VIEW IF EXISTS {}; DROP VIEW IF EXISTS {};",
        TableName::UnifiedPrices,
        TableName::UnifiedLatest
    )
}
