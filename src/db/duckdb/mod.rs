//! DuckDB analytical store
//!
//! One in-memory database shared by the whole process. Every access goes
//! through the [`AccessGuard`]: readers run on a connection cloned from the
//! root connection, writers run on the root connection itself.

pub mod guard;
pub mod models;
pub mod query;
pub mod schema;

use crate::datasets::DatasetKey;
use crate::error::Result;
use chrono::NaiveDate;
use duckdb::types::Type;
use duckdb::{Connection, Row};
use guard::AccessGuard;
use models::*;
use parking_lot::Mutex;
use query::{DateRange, SelectBuilder};
use schema::TableName;

const PRICE_SELECT: &str = "symbol, name, sector, industry, CAST(trade_date AS VARCHAR), \
                            open, close, high, low, volume, dataset_key";

const SNAPSHOT_SELECT: &str = "symbol, name, sector, industry, CAST(trade_date AS VARCHAR), \
                               open, close, high, low, volume, dataset_key, prev_close, change_pct";

const INDEX_PRICE_SELECT: &str = "symbol, name, currency, exchange, CAST(trade_date AS VARCHAR), \
                                  open, close, high, low, volume";

const INDEX_SNAPSHOT_SELECT: &str = "symbol, name, currency, exchange, CAST(trade_date AS VARCHAR), \
                                     open, close, high, low, volume, prev_close, change_pct";

/// Optional predicates on a prices table
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceFilter<'a> {
    pub symbol: Option<&'a str>,
    pub sector: Option<&'a str>,
    pub industry: Option<&'a str>,
    pub range: Option<DateRange>,
}

/// DuckDB database wrapper
pub struct DuckDb {
    conn: Mutex<Connection>,
    guard: AccessGuard,
}

impl DuckDb {
    /// Create a new in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            guard: AccessGuard::new(),
        })
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    /// Run `f` with shared access on a cloned connection
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.guard.with_read_access(|| {
            let conn = self.conn.lock().try_clone()?;
            f(&conn)
        })
    }

    /// Run `f` with exclusive access on the root connection
    pub fn write<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        self.guard.with_write_access(|| {
            let mut conn = self.conn.lock();
            f(&mut conn)
        })
    }

    // ========== Table replacement ==========

    /// Atomically replace a dataset's raw and latest tables, then recreate
    /// the unified views.
    ///
    /// `view_keys` is called while write access is held, so the view members
    /// reflect the registry at swap time. `key` is always included.
    pub fn replace_index_dataset(
        &self,
        key: &DatasetKey,
        rows: &[PriceRow],
        view_keys: impl FnOnce() -> Vec<DatasetKey>,
    ) -> Result<usize> {
        let prices = TableName::Prices(key.clone());
        let latest = TableName::Latest(key.clone());

        self.write(|conn| {
            let tx = conn.transaction()?;

            tx.execute_batch(&schema::drop_unified_views())?;
            tx.execute_batch(&schema::create_prices_table(&prices))?;

            let mut appender = tx.appender(&prices.to_string())?;
            for row in rows {
                appender.append_row(duckdb::params![
                    row.symbol,
                    row.name,
                    row.sector,
                    row.industry,
                    row.trade_date.to_string(),
                    row.open,
                    row.close,
                    row.high,
                    row.low,
                    row.volume,
                    row.dataset_key,
                ])?;
            }
            appender.flush()?;
            drop(appender);

            tx.execute_batch(&schema::create_latest_table(
                &latest,
                &prices,
                schema::PRICE_COLUMNS,
            ))?;

            let mut keys = view_keys();
            keys.push(key.clone());
            keys.sort();
            keys.dedup();
            for sql in schema::create_unified_views(&keys) {
                tx.execute_batch(&sql)?;
            }

            let count: i64 =
                tx.query_row(&format!("SELECT COUNT(*) FROM {}", prices), [], |r| r.get(0))?;

            tx.commit()?;
            Ok(count as usize)
        })
    }

    /// Atomically replace the index-level price tables
    pub fn replace_index_prices(&self, rows: &[IndexPriceRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.transaction()?;

            tx.execute_batch(&schema::create_index_prices_table())?;

            let mut appender = tx.appender(&TableName::IndexPrices.to_string())?;
            for row in rows {
                appender.append_row(duckdb::params![
                    row.symbol,
                    row.name,
                    row.currency,
                    row.exchange,
                    row.trade_date.to_string(),
                    row.open,
                    row.close,
                    row.high,
                    row.low,
                    row.volume,
                ])?;
            }
            appender.flush()?;
            drop(appender);

            tx.execute_batch(&schema::create_latest_table(
                &TableName::LatestIndexPrices,
                &TableName::IndexPrices,
                schema::INDEX_PRICE_COLUMNS,
            ))?;

            let count: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM {}", TableName::IndexPrices),
                [],
                |r| r.get(0),
            )?;

            tx.commit()?;
            Ok(count as usize)
        })
    }

    /// Recreate (or drop, when empty) the unified views.
    ///
    /// `view_keys` is called while write access is held.
    pub fn rebuild_unified_views(&self, view_keys: impl FnOnce() -> Vec<DatasetKey>) -> Result<()> {
        self.write(|conn| {
            let mut keys = view_keys();
            keys.sort();
            keys.dedup();

            let tx = conn.transaction()?;
            tx.execute_batch(&schema::drop_unified_views())?;
            for sql in schema::create_unified_views(&keys) {
                tx.execute_batch(&sql)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn replace_sector_series(&self, key: &DatasetKey, points: &[SectorSeriesPoint]) -> Result<usize> {
        let table = TableName::SectorSeries(key.clone());
        self.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&schema::create_sector_series_table(&table))?;

            let mut appender = tx.appender(&table.to_string())?;
            for p in points {
                appender.append_row(duckdb::params![p.sector, p.time.to_string(), p.pct, p.stock_count])?;
            }
            appender.flush()?;
            drop(appender);

            tx.commit()?;
            Ok(points.len())
        })
    }

    pub fn replace_industry_series(
        &self,
        key: &DatasetKey,
        points: &[IndustrySeriesPoint],
    ) -> Result<usize> {
        let table = TableName::IndustrySeries(key.clone());
        self.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&schema::create_industry_series_table(&table))?;

            let mut appender = tx.appender(&table.to_string())?;
            for p in points {
                appender.append_row(duckdb::params![
                    p.sector,
                    p.industry,
                    p.time.to_string(),
                    p.pct,
                    p.stock_count
                ])?;
            }
            appender.flush()?;
            drop(appender);

            tx.commit()?;
            Ok(points.len())
        })
    }

    pub fn replace_stock_returns(&self, key: &DatasetKey, rows: &[StockReturnRow]) -> Result<usize> {
        let table = TableName::StockReturns(key.clone());
        self.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&schema::create_stock_returns_table(&table))?;

            let mut appender = tx.appender(&table.to_string())?;
            for r in rows {
                appender.append_row(duckdb::params![
                    r.symbol,
                    r.name,
                    r.sector,
                    r.industry,
                    r.period,
                    r.start_date.to_string(),
                    r.end_date.to_string(),
                    r.start_close,
                    r.end_close,
                    r.return_pct,
                ])?;
            }
            appender.flush()?;
            drop(appender);

            tx.commit()?;
            Ok(rows.len())
        })
    }

    // ========== Queries ==========

    pub fn count_rows(&self, table: &TableName) -> Result<i64> {
        self.read(|conn| {
            let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(count)
        })
    }

    /// Query a dataset's raw price rows ordered by (symbol, trade_date)
    pub fn query_prices(&self, key: &DatasetKey, filter: PriceFilter<'_>) -> Result<Vec<PriceRow>> {
        let (sql, params) = SelectBuilder::from(TableName::Prices(key.clone()), PRICE_SELECT)
            .eq_opt("symbol", filter.symbol)
            .eq_opt("sector", filter.sector)
            .eq_opt("industry", filter.industry)
            .date_range("trade_date", filter.range)
            .order_by("symbol")
            .order_by("trade_date")
            .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), price_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Raw rows of several index datasets, read through the unified view
    pub fn query_unified_prices(&self, keys: &[DatasetKey]) -> Result<Vec<PriceRow>> {
        let (sql, params) = SelectBuilder::from(TableName::UnifiedPrices, PRICE_SELECT)
            .in_list("dataset_key", keys.iter().map(|k| k.to_string()))
            .order_by("dataset_key")
            .order_by("symbol")
            .order_by("trade_date")
            .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), price_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Latest snapshot rows of a `latest_*` table or the unified view
    pub fn query_latest(&self, table: TableName) -> Result<Vec<SnapshotRow>> {
        let (sql, params) = SelectBuilder::from(table, SNAPSHOT_SELECT)
            .order_by("dataset_key")
            .order_by("symbol")
            .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), snapshot_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn query_sector_series(
        &self,
        key: &DatasetKey,
        sector: Option<&str>,
    ) -> Result<Vec<SectorSeriesPoint>> {
        let (sql, params) = SelectBuilder::from(
            TableName::SectorSeries(key.clone()),
            "sector, CAST(time AS VARCHAR), pct, stock_count",
        )
        .eq_opt("sector", sector)
        .order_by("sector")
        .order_by("time")
        .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), |row| {
                    Ok(SectorSeriesPoint {
                        sector: row.get(0)?,
                        time: date_column(row, 1)?,
                        pct: row.get(2)?,
                        stock_count: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn query_industry_series(
        &self,
        key: &DatasetKey,
        sector: &str,
        industry: Option<&str>,
    ) -> Result<Vec<IndustrySeriesPoint>> {
        let (sql, params) = SelectBuilder::from(
            TableName::IndustrySeries(key.clone()),
            "sector, industry, CAST(time AS VARCHAR), pct, stock_count",
        )
        .eq("sector", sector)
        .eq_opt("industry", industry)
        .order_by("industry")
        .order_by("time")
        .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), |row| {
                    Ok(IndustrySeriesPoint {
                        sector: row.get(0)?,
                        industry: row.get(1)?,
                        time: date_column(row, 2)?,
                        pct: row.get(3)?,
                        stock_count: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn query_stock_returns(&self, key: &DatasetKey, period: &str) -> Result<Vec<StockReturnRow>> {
        let (sql, params) = SelectBuilder::from(
            TableName::StockReturns(key.clone()),
            "symbol, name, sector, industry, period, CAST(start_date AS VARCHAR), \
             CAST(end_date AS VARCHAR), start_close, end_close, return_pct",
        )
        .eq("period", period)
        .order_by("return_pct DESC")
        .order_by("symbol")
        .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), |row| {
                    Ok(StockReturnRow {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        sector: row.get(2)?,
                        industry: row.get(3)?,
                        period: row.get(4)?,
                        start_date: date_column(row, 5)?,
                        end_date: date_column(row, 6)?,
                        start_close: row.get(7)?,
                        end_close: row.get(8)?,
                        return_pct: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn query_index_prices(
        &self,
        symbol: Option<&str>,
        range: Option<DateRange>,
    ) -> Result<Vec<IndexPriceRow>> {
        let (sql, params) = SelectBuilder::from(TableName::IndexPrices, INDEX_PRICE_SELECT)
            .eq_opt("symbol", symbol)
            .date_range("trade_date", range)
            .order_by("symbol")
            .order_by("trade_date")
            .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), |row| {
                    Ok(IndexPriceRow {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        currency: row.get(2)?,
                        exchange: row.get(3)?,
                        trade_date: date_column(row, 4)?,
                        open: row.get(5)?,
                        close: row.get(6)?,
                        high: row.get(7)?,
                        low: row.get(8)?,
                        volume: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Latest row per market index
    pub fn query_latest_index_prices(&self) -> Result<Vec<IndexSnapshotRow>> {
        let (sql, params) = SelectBuilder::from(TableName::LatestIndexPrices, INDEX_SNAPSHOT_SELECT)
            .order_by("symbol")
            .build();

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(duckdb::params_from_iter(params), |row| {
                    Ok(IndexSnapshotRow {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        currency: row.get(2)?,
                        exchange: row.get(3)?,
                        trade_date: date_column(row, 4)?,
                        open: row.get(5)?,
                        close: row.get(6)?,
                        high: row.get(7)?,
                        low: row.get(8)?,
                        volume: row.get(9)?,
                        prev_close: row.get(10)?,
                        change_pct: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Row count of every base table in the store
    pub fn table_stats(&self) -> Result<Vec<TableStats>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT table_name, estimated_size FROM duckdb_tables() ORDER BY table_name",
            )?;
            let tables = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut stats = Vec::with_capacity(tables.len());
            for (table_name, estimated_size) in tables {
                let row_count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM \"{}\"", table_name),
                    [],
                    |r| r.get(0),
                )?;
                stats.push(TableStats {
                    table_name,
                    row_count,
                    estimated_size,
                });
            }
            Ok(stats)
        })
    }

    /// Memory used by the database as reported by DuckDB (e.g. "12.5 MiB")
    pub fn memory_usage(&self) -> Result<String> {
        self.read(|conn| {
            let usage = conn.query_row(
                "SELECT memory_usage FROM pragma_database_size()",
                [],
                |r| r.get(0),
            )?;
            Ok(usage)
        })
    }
}

fn date_column(row: &Row<'_>, idx: usize) -> duckdb::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn price_from_row(row: &Row<'_>) -> duckdb::Result<PriceRow> {
    Ok(PriceRow {
        symbol: row.get(0)?,
        name: row.get(1)?,
        sector: row.get(2)?,
        industry: row.get(3)?,
        trade_date: date_column(row, 4)?,
        open: row.get(5)?,
        close: row.get(6)?,
        high: row.get(7)?,
        low: row.get(8)?,
        volume: row.get(9)?,
        dataset_key: row.get(10)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> duckdb::Result<SnapshotRow> {
    Ok(SnapshotRow {
        symbol: row.get(0)?,
        name: row.get(1)?,
        sector: row.get(2)?,
        industry: row.get(3)?,
        trade_date: date_column(row, 4)?,
        open: row.get(5)?,
        close: row.get(6)?,
        high: row.get(7)?,
        low: row.get(8)?,
        volume: row.get(9)?,
        dataset_key: row.get(10)?,
        prev_close: row.get(11)?,
        change_pct: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(symbol: &str, sector: &str, d: &str, close: f64) -> PriceRow {
        PriceRow {
            symbol: symbol.to_string(),
            name: format!("{} Inc", symbol),
            sector: sector.to_string(),
            industry: "Software".to_string(),
            trade_date: date(d),
            open: close,
            close,
            high: close,
            low: close,
            volume: 1000,
            dataset_key: "idxa".to_string(),
        }
    }

    fn key(k: &str) -> DatasetKey {
        DatasetKey::new(k).unwrap()
    }

    #[test]
    fn test_replace_and_query_prices() {
        let db = DuckDb::open_in_memory().unwrap();
        let idx = key("idxa");
        let rows = vec![
            row("AAA", "Tech", "2024-01-02", 10.0),
            row("AAA", "Tech", "2024-01-03", 11.0),
            row("BBB", "Energy", "2024-01-02", 20.0),
        ];

        let count = db.replace_index_dataset(&idx, &rows, Vec::new).unwrap();
        assert_eq!(count, 3);

        let all = db.query_prices(&idx, PriceFilter::default()).unwrap();
        assert_eq!(all, rows);

        let filtered = db
            .query_prices(
                &idx,
                PriceFilter {
                    symbol: Some("AAA"),
                    range: Some(DateRange {
                        start: Some(date("2024-01-03")),
                        end: None,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].close, 11.0);
    }

    #[test]
    fn test_latest_snapshot_has_previous_close() {
        let db = DuckDb::open_in_memory().unwrap();
        let idx = key("idxa");
        let rows = vec![
            row("AAA", "Tech", "2024-01-02", 10.0),
            row("AAA", "Tech", "2024-01-03", 11.0),
            row("BBB", "Energy", "2024-01-02", 20.0),
        ];
        db.replace_index_dataset(&idx, &rows, Vec::new).unwrap();

        let latest = db.query_latest(TableName::Latest(idx.clone())).unwrap();
        assert_eq!(latest.len(), 2);

        let aaa = latest.iter().find(|r| r.symbol == "AAA").unwrap();
        assert_eq!(aaa.trade_date, date("2024-01-03"));
        assert_eq!(aaa.prev_close, Some(10.0));
        assert!((aaa.change_pct.unwrap() - 10.0).abs() < 1e-9);

        let bbb = latest.iter().find(|r| r.symbol == "BBB").unwrap();
        assert_eq!(bbb.prev_close, None);
        assert_eq!(bbb.change_pct, None);
    }

    #[test]
    fn test_replace_is_wholesale_and_views_follow() {
        let db = DuckDb::open_in_memory().unwrap();
        let a = key("idxa");
        let b = key("idxb");

        db.replace_index_dataset(&a, &[row("AAA", "Tech", "2024-01-02", 1.0)], Vec::new)
            .unwrap();
        let mut b_row = row("BBB", "Tech", "2024-01-02", 2.0);
        b_row.dataset_key = "idxb".to_string();
        db.replace_index_dataset(&b, &[b_row], || vec![a.clone()])
            .unwrap();

        assert_eq!(db.count_rows(&TableName::UnifiedPrices).unwrap(), 2);
        assert_eq!(db.query_latest(TableName::UnifiedLatest).unwrap().len(), 2);

        // Replacing idxa with a different row set drops the old rows
        let rows = vec![
            row("CCC", "Tech", "2024-01-02", 1.0),
            row("DDD", "Tech", "2024-01-02", 1.0),
        ];
        db.replace_index_dataset(&a, &rows, || vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(db.count_rows(&TableName::Prices(a.clone())).unwrap(), 2);
        assert_eq!(db.count_rows(&TableName::UnifiedPrices).unwrap(), 3);

        // idxb failed: the views only cover idxa
        db.rebuild_unified_views(|| vec![a.clone()]).unwrap();
        assert_eq!(db.count_rows(&TableName::UnifiedPrices).unwrap(), 2);

        db.rebuild_unified_views(Vec::new).unwrap();
        assert!(db.count_rows(&TableName::UnifiedPrices).is_err());
    }

    #[test]
    fn test_unified_prices_filter_by_dataset() {
        let db = DuckDb::open_in_memory().unwrap();
        let a = key("idxa");
        let b = key("idxb");
        db.replace_index_dataset(&a, &[row("AAA", "Tech", "2024-01-02", 1.0)], Vec::new)
            .unwrap();
        let mut b_rows = vec![
            row("BBB", "Energy", "2024-01-02", 2.0),
            row("BBB", "Energy", "2024-01-03", 3.0),
        ];
        for r in &mut b_rows {
            r.dataset_key = "idxb".to_string();
        }
        db.replace_index_dataset(&b, &b_rows, || vec![a.clone()]).unwrap();

        assert_eq!(db.query_unified_prices(&[a.clone(), b.clone()]).unwrap().len(), 3);
        assert_eq!(db.query_unified_prices(&[b.clone()]).unwrap(), b_rows);
        assert!(db.query_unified_prices(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_latest_index_prices() {
        let db = DuckDb::open_in_memory().unwrap();
        let index_row = |symbol: &str, d: &str, close: f64| IndexPriceRow {
            symbol: symbol.to_string(),
            name: format!("{} Index", symbol),
            currency: "USD".to_string(),
            exchange: "NYSE".to_string(),
            trade_date: date(d),
            open: close,
            close,
            high: close,
            low: close,
            volume: 0,
        };
        let rows = vec![
            index_row("^GSPC", "2024-01-02", 100.0),
            index_row("^GSPC", "2024-01-03", 105.0),
            index_row("^N225", "2024-01-03", 50.0),
        ];
        assert_eq!(db.replace_index_prices(&rows).unwrap(), 3);

        let latest = db.query_latest_index_prices().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].symbol, "^GSPC");
        assert_eq!(latest[0].trade_date, date("2024-01-03"));
        assert_eq!(latest[0].prev_close, Some(100.0));
        assert!((latest[0].change_pct.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(latest[1].prev_close, None);
    }

    #[test]
    fn test_series_tables_round_trip() {
        let db = DuckDb::open_in_memory().unwrap();
        let idx = key("idxa");
        let points = vec![
            SectorSeriesPoint {
                sector: "Tech".to_string(),
                time: date("2024-01-02"),
                pct: 0.0,
                stock_count: 2,
            },
            SectorSeriesPoint {
                sector: "Tech".to_string(),
                time: date("2024-01-03"),
                pct: 1.5,
                stock_count: 2,
            },
        ];
        db.replace_sector_series(&idx, &points).unwrap();
        assert_eq!(db.query_sector_series(&idx, Some("Tech")).unwrap(), points);
        assert!(db.query_sector_series(&idx, Some("Energy")).unwrap().is_empty());

        // Rebuild replaces wholesale
        db.replace_sector_series(&idx, &points[..1]).unwrap();
        assert_eq!(db.query_sector_series(&idx, None).unwrap().len(), 1);
    }

    #[test]
    fn test_table_stats_lists_loaded_tables() {
        let db = DuckDb::open_in_memory().unwrap();
        let idx = key("idxa");
        db.replace_index_dataset(&idx, &[row("AAA", "Tech", "2024-01-02", 1.0)], Vec::new)
            .unwrap();

        let stats = db.table_stats().unwrap();
        let prices = stats.iter().find(|s| s.table_name == "prices_idxa").unwrap();
        assert_eq!(prices.row_count, 1);
        assert!(stats.iter().any(|s| s.table_name == "latest_idxa"));
        assert!(db.guard().state().writes_completed >= 1);
    }
}
