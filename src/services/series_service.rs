//! Series Service
//!
//! Derived series built from a dataset's raw prices: normalized sector and
//! industry time series, and per-stock returns over the standard lookback
//! menu. The math is pure and lives in free functions so the query service
//! can reuse it when a precomputed table is not ready yet.

use crate::datasets::{DatasetKey, SeriesKind};
use crate::db::duckdb::models::{
    IndustrySeriesPoint, PriceRow, SectorReturn, SectorSeriesPoint, StockReturnRow,
};
use crate::db::duckdb::query::DateRange;
use crate::db::duckdb::{DuckDb, PriceFilter};
use crate::error::{AppError, Result};
use crate::services::query_service::MarketQueryService;
use crate::state::AppState;
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lookback window for stock returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnPeriod {
    Week,
    Month,
    Quarter,
    HalfYear,
    Year,
    FiveYears,
    Max,
    Custom(DateRange),
}

impl ReturnPeriod {
    /// Periods materialized into the stock-return table
    pub const STANDARD: [ReturnPeriod; 7] = [
        ReturnPeriod::Week,
        ReturnPeriod::Month,
        ReturnPeriod::Quarter,
        ReturnPeriod::HalfYear,
        ReturnPeriod::Year,
        ReturnPeriod::FiveYears,
        ReturnPeriod::Max,
    ];

    /// Periods whose sector summaries are warmed into the response cache
    pub const PREWARMED: [ReturnPeriod; 2] = [ReturnPeriod::Max, ReturnPeriod::Year];

    /// Parse `1w`, `1mo`, `3mo`, `6mo`, `1y`, `5y`, `max` or `YYYY-MM-DD..YYYY-MM-DD`
    pub fn parse(raw: &str) -> Result<Self> {
        let period = match raw.trim() {
            "1w" => ReturnPeriod::Week,
            "1mo" => ReturnPeriod::Month,
            "3mo" => ReturnPeriod::Quarter,
            "6mo" => ReturnPeriod::HalfYear,
            "1y" => ReturnPeriod::Year,
            "5y" => ReturnPeriod::FiveYears,
            "max" => ReturnPeriod::Max,
            other => {
                let Some((start, end)) = other.split_once("..") else {
                    return Err(AppError::Validation(format!("Unknown period: {}", other)));
                };
                return Self::custom(parse_date(start)?, parse_date(end)?);
            }
        };
        Ok(period)
    }

    pub fn custom(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::Validation(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        Ok(ReturnPeriod::Custom(DateRange::between(start, end)))
    }

    /// Lookback in calendar days; `None` for max and custom ranges
    pub fn days(&self) -> Option<i64> {
        match self {
            ReturnPeriod::Week => Some(7),
            ReturnPeriod::Month => Some(30),
            ReturnPeriod::Quarter => Some(90),
            ReturnPeriod::HalfYear => Some(180),
            ReturnPeriod::Year => Some(365),
            ReturnPeriod::FiveYears => Some(1825),
            ReturnPeriod::Max | ReturnPeriod::Custom(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ReturnPeriod::Week => "1w".to_string(),
            ReturnPeriod::Month => "1mo".to_string(),
            ReturnPeriod::Quarter => "3mo".to_string(),
            ReturnPeriod::HalfYear => "6mo".to_string(),
            ReturnPeriod::Year => "1y".to_string(),
            ReturnPeriod::FiveYears => "5y".to_string(),
            ReturnPeriod::Max => "max".to_string(),
            ReturnPeriod::Custom(range) => range.cache_repr(),
        }
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, ReturnPeriod::Custom(_))
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid date: {}", raw)))
}

/// Sector and industry labels the warehouse uses for "unknown"
fn is_valid_group(value: &str) -> bool {
    !value.is_empty() && value != "N/A" && value != "0"
}

/// Equal-weighted normalized series per group.
///
/// Each stock is expressed as percent change from its own first close,
/// forward-filled across the group's trading days from its first date on,
/// then averaged. Returns `(group, date, pct, contributing stocks)`.
pub fn normalized_group_series<G, F>(rows: &[PriceRow], group_of: F) -> Vec<(G, NaiveDate, f64, i64)>
where
    G: Ord + Clone,
    F: Fn(&PriceRow) -> Option<G>,
{
    let mut groups: BTreeMap<G, BTreeMap<&str, Vec<(NaiveDate, f64)>>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.close.is_finite()) {
        if let Some(group) = group_of(row) {
            groups
                .entry(group)
                .or_default()
                .entry(row.symbol.as_str())
                .or_default()
                .push((row.trade_date, row.close));
        }
    }

    let mut out = Vec::new();
    for (group, stocks) in groups {
        let timeline: Vec<NaiveDate> = stocks
            .values()
            .flat_map(|points| points.iter().map(|(d, _)| *d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut sums = vec![0.0; timeline.len()];
        let mut counts = vec![0i64; timeline.len()];

        for mut points in stocks.into_values() {
            points.sort_by_key(|(d, _)| *d);
            let Some(&(_, base)) = points.first() else {
                continue;
            };
            if base == 0.0 {
                continue;
            }

            let mut next = 0;
            let mut current = None;
            for (i, date) in timeline.iter().enumerate() {
                while next < points.len() && points[next].0 <= *date {
                    current = Some((points[next].1 / base - 1.0) * 100.0);
                    next += 1;
                }
                if let Some(pct) = current {
                    sums[i] += pct;
                    counts[i] += 1;
                }
            }
        }

        for (i, date) in timeline.into_iter().enumerate() {
            if counts[i] > 0 {
                out.push((group.clone(), date, sums[i] / counts[i] as f64, counts[i]));
            }
        }
    }
    out
}

pub fn sector_series(rows: &[PriceRow]) -> Vec<SectorSeriesPoint> {
    normalized_group_series(rows, |r| is_valid_group(&r.sector).then(|| r.sector.clone()))
        .into_iter()
        .map(|(sector, time, pct, stock_count)| SectorSeriesPoint {
            sector,
            time,
            pct,
            stock_count,
        })
        .collect()
}

pub fn industry_series(rows: &[PriceRow]) -> Vec<IndustrySeriesPoint> {
    normalized_group_series(rows, |r| {
        (is_valid_group(&r.sector) && is_valid_group(&r.industry))
            .then(|| (r.sector.clone(), r.industry.clone()))
    })
    .into_iter()
    .map(|((sector, industry), time, pct, stock_count)| IndustrySeriesPoint {
        sector,
        industry,
        time,
        pct,
        stock_count,
    })
    .collect()
}

/// Per-stock return over `period`, best first.
///
/// Standard windows are anchored on the latest trade date in `rows`; a
/// stock needs at least two closes inside the window.
pub fn stock_returns(rows: &[PriceRow], period: ReturnPeriod) -> Vec<StockReturnRow> {
    let Some(anchor) = rows.iter().map(|r| r.trade_date).max() else {
        return Vec::new();
    };

    let window = match period {
        ReturnPeriod::Custom(range) => range,
        ReturnPeriod::Max => DateRange::default(),
        other => DateRange {
            start: other.days().map(|days| anchor - Duration::days(days)),
            end: None,
        },
    };

    let mut by_symbol: BTreeMap<&str, Vec<&PriceRow>> = BTreeMap::new();
    for row in rows
        .iter()
        .filter(|r| r.close.is_finite() && window.contains(r.trade_date))
    {
        by_symbol.entry(row.symbol.as_str()).or_default().push(row);
    }

    let label = period.label();
    let mut out: Vec<StockReturnRow> = by_symbol
        .into_values()
        .filter_map(|mut points| {
            if points.len() < 2 {
                return None;
            }
            points.sort_by_key(|r| r.trade_date);
            let first = points.first()?;
            let last = points.last()?;
            if first.close == 0.0 {
                return None;
            }
            Some(StockReturnRow {
                symbol: last.symbol.clone(),
                name: last.name.clone(),
                sector: last.sector.clone(),
                industry: last.industry.clone(),
                period: label.clone(),
                start_date: first.trade_date,
                end_date: last.trade_date,
                start_close: first.close,
                end_close: last.close,
                return_pct: (last.close / first.close - 1.0) * 100.0,
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.return_pct
            .total_cmp(&a.return_pct)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    out
}

/// Stock returns for every standard period
pub fn all_stock_returns(rows: &[PriceRow]) -> Vec<StockReturnRow> {
    ReturnPeriod::STANDARD
        .iter()
        .flat_map(|period| stock_returns(rows, *period))
        .collect()
}

/// Average stock return per sector, best first
pub fn sector_returns(returns: &[StockReturnRow]) -> Vec<SectorReturn> {
    let mut totals: BTreeMap<&str, (f64, i64)> = BTreeMap::new();
    for r in returns.iter().filter(|r| is_valid_group(&r.sector)) {
        let entry = totals.entry(r.sector.as_str()).or_insert((0.0, 0));
        entry.0 += r.return_pct;
        entry.1 += 1;
    }

    let mut out: Vec<SectorReturn> = totals
        .into_iter()
        .map(|(sector, (sum, count))| SectorReturn {
            sector: sector.to_string(),
            return_pct: sum / count as f64,
            stock_count: count,
        })
        .collect();
    out.sort_by(|a, b| {
        b.return_pct
            .total_cmp(&a.return_pct)
            .then_with(|| a.sector.cmp(&b.sector))
    });
    out
}

/// Sector returns pooled across several indices.
///
/// Stock returns are taken per dataset so a symbol listed in two indices
/// counts once in each.
pub fn cross_index_sector_returns(rows: &[PriceRow], period: ReturnPeriod) -> Vec<SectorReturn> {
    let mut by_dataset: BTreeMap<&str, Vec<PriceRow>> = BTreeMap::new();
    for row in rows {
        by_dataset.entry(row.dataset_key.as_str()).or_default().push(row.clone());
    }

    let returns: Vec<StockReturnRow> = by_dataset
        .values()
        .flat_map(|rows| stock_returns(rows, period))
        .collect();
    sector_returns(&returns)
}

/// Series service for precomputation
pub struct SeriesService;

impl SeriesService {
    /// Build every derivation of `key` for load `generation`; returns how many succeeded
    pub async fn precompute_all(state: &AppState, key: &DatasetKey, generation: u64) -> usize {
        let started = Instant::now();
        let mut ready = 0;
        for kind in SeriesKind::ALL {
            if Self::precompute(state, key, kind, generation).await {
                ready += 1;
            }
        }
        info!(
            "[{}] Precomputed {}/{} derived series in {:.1}s",
            key,
            ready,
            SeriesKind::ALL.len(),
            started.elapsed().as_secs_f64()
        );
        ready
    }

    /// Build one derivation; false if it failed or the load was superseded
    pub async fn precompute(
        state: &AppState,
        key: &DatasetKey,
        kind: SeriesKind,
        generation: u64,
    ) -> bool {
        if state.registry.generation(key) != generation || !state.registry.is_loaded(key) {
            debug!("[{}] Skipping {}: load generation {} superseded", key, kind.label(), generation);
            return false;
        }
        if !state.series.mark_computing(key, kind, generation) {
            return false;
        }

        let store = state.store.clone();
        let table_key = key.clone();
        let result =
            tokio::task::spawn_blocking(move || Self::materialize(&store, &table_key, kind)).await;

        let ok = match result {
            Ok(Ok(0)) => {
                warn!("[{}] No rows for {}", key, kind.label());
                false
            }
            Ok(Ok(count)) => {
                info!("[{}] {} ready ({} rows)", key, kind.label(), count);
                true
            }
            Ok(Err(e)) => {
                error!("[{}] {} failed: {}", key, kind.label(), e);
                false
            }
            Err(e) => {
                error!("[{}] {} task failed: {}", key, kind.label(), e);
                false
            }
        };

        state.series.finish(key, kind, generation, ok) && ok
    }

    fn materialize(store: &DuckDb, key: &DatasetKey, kind: SeriesKind) -> Result<usize> {
        let rows = store.query_prices(key, PriceFilter::default())?;
        if rows.is_empty() {
            return Ok(0);
        }

        match kind {
            SeriesKind::Sector => {
                let points = sector_series(&rows);
                if points.is_empty() {
                    return Ok(0);
                }
                store.replace_sector_series(key, &points)
            }
            SeriesKind::Industry => {
                let points = industry_series(&rows);
                if points.is_empty() {
                    return Ok(0);
                }
                store.replace_industry_series(key, &points)
            }
            SeriesKind::StockReturns => {
                let returns = all_stock_returns(&rows);
                if returns.is_empty() {
                    return Ok(0);
                }
                store.replace_stock_returns(key, &returns)
            }
        }
    }

    /// Warm the sector-return summaries so the first dashboard request hits the cache
    pub async fn prewarm(state: &AppState, key: &DatasetKey) -> usize {
        let started = Instant::now();
        let mut warmed = 0;
        for period in ReturnPeriod::PREWARMED {
            match MarketQueryService::get_sector_returns(state, key.as_str(), period).await {
                Ok(result) if result.ready => warmed += 1,
                Ok(_) => debug!("[{}] Dataset not ready, skipping cache warm", key),
                Err(e) => warn!("[{}] Cache warm for {} failed: {}", key, period.label(), e),
            }
        }
        info!(
            "[{}] Sector caches pre-warmed in {:.1}s",
            key,
            started.elapsed().as_secs_f64()
        );
        warmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::SeriesStatus;
    use crate::services::loader_service::DatasetLoader;
    use crate::state::testing::{memory_state, price_rows, seed};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(symbol: &str, sector: &str, d: &str, close: f64) -> PriceRow {
        PriceRow {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            sector: sector.to_string(),
            industry: "Any".to_string(),
            trade_date: date(d),
            open: close,
            close,
            high: close,
            low: close,
            volume: 100,
            dataset_key: "idxa".to_string(),
        }
    }

    #[test]
    fn test_sector_series_normalization() {
        let days = ["2024-01-01", "2024-01-02", "2024-01-03"];
        let mut rows = Vec::new();
        for (symbol, closes) in [
            ("A", [100.0, 110.0, 121.0]),
            ("B", [50.0, 45.0, 40.5]),
            ("C", [10.0, 10.0, 10.0]),
        ] {
            for (d, close) in days.iter().zip(closes) {
                rows.push(row(symbol, "Tech", d, close));
            }
        }

        let series = sector_series(&rows);
        assert_eq!(series.len(), 3);
        assert!(series[0].pct.abs() < 1e-9);
        assert_eq!(series[2].time, date("2024-01-03"));
        assert!((series[2].pct - 2.0 / 3.0).abs() < 1e-9);
        assert!(series.iter().all(|p| p.stock_count == 3));
    }

    #[test]
    fn test_forward_fill_on_gap_without_backfill() {
        let rows = vec![
            row("A", "Tech", "2024-01-01", 100.0),
            row("A", "Tech", "2024-01-02", 110.0),
            row("A", "Tech", "2024-01-03", 120.0),
            // B has no row on day 2 and starts on day 1
            row("B", "Tech", "2024-01-01", 50.0),
            row("B", "Tech", "2024-01-03", 60.0),
            // C starts on day 2
            row("C", "Tech", "2024-01-02", 10.0),
            row("C", "Tech", "2024-01-03", 11.0),
        ];

        let series = sector_series(&rows);
        assert_eq!(series.len(), 3);

        // Day 1: A and B only
        assert_eq!(series[0].stock_count, 2);
        // Day 2: A 10%, B carried at 0%, C 0%
        assert_eq!(series[1].stock_count, 3);
        assert!((series[1].pct - 10.0 / 3.0).abs() < 1e-9);
        // Day 3: A 20%, B 20%, C 10%
        assert!((series[2].pct - 50.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_groups_and_zero_base_are_excluded() {
        let rows = vec![
            row("A", "", "2024-01-01", 100.0),
            row("B", "N/A", "2024-01-01", 100.0),
            row("C", "Tech", "2024-01-01", 0.0),
            row("C", "Tech", "2024-01-02", 5.0),
            row("D", "Tech", "2024-01-02", 20.0),
        ];

        let series = sector_series(&rows);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].sector, "Tech");
        assert_eq!(series[0].time, date("2024-01-02"));
        assert_eq!(series[0].stock_count, 1);
    }

    #[test]
    fn test_industry_series_groups_by_sector_and_industry() {
        let mut a = row("A", "Tech", "2024-01-01", 10.0);
        a.industry = "Software".to_string();
        let mut b = row("B", "Tech", "2024-01-01", 10.0);
        b.industry = "Hardware".to_string();
        let mut c = row("C", "Tech", "2024-01-01", 10.0);
        c.industry = "".to_string();

        let series = industry_series(&[a, b, c]);
        let names: Vec<&str> = series.iter().map(|p| p.industry.as_str()).collect();
        assert_eq!(names, vec!["Hardware", "Software"]);
    }

    #[test]
    fn test_stock_returns_windows() {
        let rows = vec![
            row("A", "Tech", "2023-01-01", 50.0),
            row("A", "Tech", "2023-12-30", 100.0),
            row("A", "Tech", "2024-01-01", 110.0),
            row("B", "Tech", "2024-01-01", 20.0),
        ];

        let year = stock_returns(&rows, ReturnPeriod::Year);
        assert_eq!(year.len(), 1);
        assert_eq!(year[0].symbol, "A");
        assert_eq!(year[0].start_date, date("2023-01-01"));
        assert!((year[0].return_pct - 120.0).abs() < 1e-9);

        let week = stock_returns(&rows, ReturnPeriod::Week);
        assert_eq!(week[0].start_close, 100.0);
        assert!((week[0].return_pct - 10.0).abs() < 1e-9);

        let custom = stock_returns(
            &rows,
            ReturnPeriod::custom(date("2023-01-01"), date("2023-12-31")).unwrap(),
        );
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].end_close, 100.0);
        assert_eq!(custom[0].period, "2023-01-01..2023-12-31");
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!(ReturnPeriod::parse("1y").unwrap(), ReturnPeriod::Year);
        assert_eq!(ReturnPeriod::parse("max").unwrap().label(), "max");
        assert!(ReturnPeriod::parse("2y").is_err());
        assert!(ReturnPeriod::parse("2024-02-01..2024-01-01").is_err());
        assert!(!ReturnPeriod::parse("2024-01-01..2024-02-01").unwrap().is_standard());
    }

    #[test]
    fn test_sector_returns_average() {
        let returns: Vec<StockReturnRow> = [("A", "Tech", 10.0), ("B", "Tech", 20.0), ("C", "Energy", -5.0)]
            .into_iter()
            .map(|(symbol, sector, pct)| StockReturnRow {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                sector: sector.to_string(),
                industry: "Any".to_string(),
                period: "1y".to_string(),
                start_date: date("2024-01-01"),
                end_date: date("2024-02-01"),
                start_close: 1.0,
                end_close: 1.0,
                return_pct: pct,
            })
            .collect();

        let sectors = sector_returns(&returns);
        assert_eq!(sectors[0].sector, "Tech");
        assert!((sectors[0].return_pct - 15.0).abs() < 1e-9);
        assert_eq!(sectors[0].stock_count, 2);
        assert_eq!(sectors[1].sector, "Energy");
    }

    #[test]
    fn test_cross_index_sector_returns_keep_listings_apart() {
        let mut rows = vec![
            row("A", "Tech", "2024-01-01", 100.0),
            row("A", "Tech", "2024-01-02", 110.0),
        ];
        // Same symbol listed in a second index with its own prices
        for (d, close) in [("2024-01-01", 100.0), ("2024-01-02", 130.0)] {
            let mut listing = row("A", "Tech", d, close);
            listing.dataset_key = "idxb".to_string();
            rows.push(listing);
        }
        for (d, close) in [("2024-01-01", 10.0), ("2024-01-02", 9.0)] {
            let mut other = row("E", "Energy", d, close);
            other.dataset_key = "idxb".to_string();
            rows.push(other);
        }

        let sectors = cross_index_sector_returns(&rows, ReturnPeriod::Max);
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].sector, "Tech");
        assert_eq!(sectors[0].stock_count, 2);
        assert!((sectors[0].return_pct - 20.0).abs() < 1e-9);
        assert!((sectors[1].return_pct + 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_precompute_marks_ready_and_discards_stale_generation() {
        let (state, warehouse, _rx) = memory_state(&["idxa"]);
        seed(&warehouse, "idxa", price_rows("idxa", 6, 30));
        let dataset = state.catalog.resolve("idxa").unwrap().clone();
        let key = dataset.key.clone();

        let generation = state.registry.mark_loading(&key, uuid::Uuid::new_v4());
        state.series.reset(&key, generation);
        let outcome = DatasetLoader::load_dataset(&state, &dataset).await;
        state.registry.mark_loaded(&key, outcome.row_count);

        assert_eq!(SeriesService::precompute_all(&state, &key, generation).await, 3);
        for kind in SeriesKind::ALL {
            assert_eq!(state.series.status(&key, kind), SeriesStatus::Ready);
        }
        assert_eq!(state.store.query_sector_series(&key, None).unwrap().len(), 3 * 30);

        // A newer load supersedes the old generation
        let newer = state.registry.mark_loading(&key, uuid::Uuid::new_v4());
        state.series.reset(&key, newer);
        assert!(!SeriesService::precompute(&state, &key, SeriesKind::Sector, generation).await);
        assert!(!state.series.finish(&key, SeriesKind::Sector, generation, true));
        assert_eq!(state.series.status(&key, SeriesKind::Sector), SeriesStatus::Pending);
    }
}
