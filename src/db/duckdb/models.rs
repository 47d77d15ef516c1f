//! DuckDB data models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily price row of one index constituent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub dataset_key: String,
}

/// Daily price row of a market index itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPriceRow {
    pub symbol: String,
    pub name: String,
    pub currency: String,
    pub exchange: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
}

/// Latest row per symbol with the preceding close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub dataset_key: String,
    pub prev_close: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Latest row per market index with the preceding close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshotRow {
    pub symbol: String,
    pub name: String,
    pub currency: String,
    pub exchange: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub prev_close: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Point of a precomputed sector series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorSeriesPoint {
    pub sector: String,
    pub time: NaiveDate,
    pub pct: f64,
    pub stock_count: i64,
}

/// Point of a precomputed industry series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustrySeriesPoint {
    pub sector: String,
    pub industry: String,
    pub time: NaiveDate,
    pub pct: f64,
    pub stock_count: i64,
}

/// Return of one stock over one lookback period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReturnRow {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub period: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_close: f64,
    pub end_close: f64,
    pub return_pct: f64,
}

/// Average stock return of one sector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorReturn {
    pub sector: String,
    pub return_pct: f64,
    pub stock_count: i64,
}

/// Row count and estimated size of one store table
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table_name: String,
    pub row_count: i64,
    pub estimated_size: i64,
}
