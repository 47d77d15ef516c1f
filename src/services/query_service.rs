//! Market Query Service
//!
//! Read paths behind the dashboard API. Every query consults the response
//! cache first, then the load-state registry. A dataset that is not loaded
//! yields an empty result with `ready = false` and a background load is
//! triggered; handlers never wait for a load.

use crate::cache::CacheKey;
use crate::datasets::{DatasetConfig, DatasetKey, DatasetKind, LazyDecision, LoadStatus, SeriesKind, INDEX_PRICES_KEY};
use crate::db::duckdb::models::{
    IndexPriceRow, IndexSnapshotRow, IndustrySeriesPoint, PriceRow, SectorReturn,
    SectorSeriesPoint, SnapshotRow, StockReturnRow,
};
use crate::db::duckdb::query::DateRange;
use crate::db::duckdb::schema::TableName;
use crate::db::duckdb::{DuckDb, PriceFilter};
use crate::error::{AppError, Result};
use crate::scheduler::refresh::RefreshOrchestrator;
use crate::services::series_service::{self, ReturnPeriod};
use crate::state::AppState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Query response envelope
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult<T> {
    pub dataset: String,
    pub status: LoadStatus,
    /// False while the dataset is not loaded; `data` is then empty
    pub ready: bool,
    pub cached: bool,
    pub data: Vec<T>,
}

impl<T> QueryResult<T> {
    fn ready(dataset: &str, cached: bool, data: Vec<T>) -> Self {
        Self {
            dataset: dataset.to_string(),
            status: LoadStatus::Loaded,
            ready: true,
            cached,
            data,
        }
    }

    fn not_ready(state: &AppState, key: &DatasetKey) -> Self {
        let status = state
            .registry
            .get_status(key)
            .map(|s| s.status)
            .unwrap_or(LoadStatus::Unloaded);
        Self {
            dataset: key.to_string(),
            status,
            ready: false,
            cached: false,
            data: Vec::new(),
        }
    }
}

/// Market query service
pub struct MarketQueryService;

impl MarketQueryService {
    /// Raw daily prices, optionally for one symbol and date window
    pub async fn get_prices(
        state: &AppState,
        dataset: &str,
        symbol: Option<&str>,
        range: Option<DateRange>,
    ) -> Result<QueryResult<PriceRow>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("prices")
            .dataset(&key)
            .param_opt("symbol", symbol)
            .param_opt("range", range.map(|r| r.cache_repr()))
            .build();

        let symbol = symbol.map(str::to_string);
        Self::serve(state, &dataset, cache_key, move |store| {
            store.query_prices(
                &key,
                PriceFilter {
                    symbol: symbol.as_deref(),
                    range,
                    ..Default::default()
                },
            )
        })
        .await
    }

    /// Latest row per symbol with its previous close
    pub async fn get_latest_snapshot(state: &AppState, dataset: &str) -> Result<QueryResult<SnapshotRow>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("latest").dataset(&key).build();

        Self::serve(state, &dataset, cache_key, move |store| {
            store.query_latest(TableName::Latest(key))
        })
        .await
    }

    /// Latest snapshot across every loaded index
    pub async fn get_latest_snapshot_all(state: &AppState) -> Result<QueryResult<SnapshotRow>> {
        let loaded = Self::loaded_indices(state);

        if loaded.is_empty() {
            return Ok(QueryResult {
                dataset: "all".to_string(),
                status: LoadStatus::Unloaded,
                ready: false,
                cached: false,
                data: Vec::new(),
            });
        }

        // The key names every member so refreshing any of them invalidates it
        let cache_key = CacheKey::builder("latest_all")
            .param("datasets", Self::members_label(&loaded))
            .build();

        if let Some(data) = Self::cached::<SnapshotRow>(state, &cache_key)? {
            return Ok(QueryResult::ready("all", true, data));
        }

        let data = Self::blocking(state, |store| store.query_latest(TableName::UnifiedLatest)).await?;
        state.cache.put(cache_key, serde_json::to_value(&data)?);
        Ok(QueryResult::ready("all", false, data))
    }

    /// Normalized sector series; computed from raw prices when the
    /// precomputed table is not ready
    pub async fn get_sector_series(
        state: &AppState,
        dataset: &str,
        sector: Option<&str>,
    ) -> Result<QueryResult<SectorSeriesPoint>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("sector_series")
            .dataset(&key)
            .param_opt("sector", sector)
            .build();

        let precomputed = state.series.is_ready(&key, SeriesKind::Sector);
        let sector = sector.map(str::to_string);
        Self::serve(state, &dataset, cache_key, move |store| {
            if precomputed {
                return store.query_sector_series(&key, sector.as_deref());
            }
            debug!("[{}] Sector series not ready, computing from prices", key);
            let rows = store.query_prices(
                &key,
                PriceFilter {
                    sector: sector.as_deref(),
                    ..Default::default()
                },
            )?;
            Ok(series_service::sector_series(&rows))
        })
        .await
    }

    /// Normalized industry series within one sector
    pub async fn get_industry_series(
        state: &AppState,
        dataset: &str,
        sector: &str,
        industry: Option<&str>,
    ) -> Result<QueryResult<IndustrySeriesPoint>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("industry_series")
            .dataset(&key)
            .param("sector", sector)
            .param_opt("industry", industry)
            .build();

        let precomputed = state.series.is_ready(&key, SeriesKind::Industry);
        let sector = sector.to_string();
        let industry = industry.map(str::to_string);
        Self::serve(state, &dataset, cache_key, move |store| {
            if precomputed {
                return store.query_industry_series(&key, &sector, industry.as_deref());
            }
            debug!("[{}] Industry series not ready, computing from prices", key);
            let rows = store.query_prices(
                &key,
                PriceFilter {
                    sector: Some(sector.as_str()),
                    industry: industry.as_deref(),
                    ..Default::default()
                },
            )?;
            Ok(series_service::industry_series(&rows))
        })
        .await
    }

    /// Per-stock returns, best first; custom ranges are computed on demand
    pub async fn get_stock_returns(
        state: &AppState,
        dataset: &str,
        period: ReturnPeriod,
    ) -> Result<QueryResult<StockReturnRow>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("stock_returns")
            .dataset(&key)
            .param("period", period.label())
            .build();

        let precomputed = state.series.is_ready(&key, SeriesKind::StockReturns);
        Self::serve(state, &dataset, cache_key, move |store| {
            Self::read_stock_returns(store, &key, period, precomputed)
        })
        .await
    }

    /// Average stock return per sector over `period`
    pub async fn get_sector_returns(
        state: &AppState,
        dataset: &str,
        period: ReturnPeriod,
    ) -> Result<QueryResult<SectorReturn>> {
        let dataset = Self::index_dataset(state, dataset)?;
        let key = dataset.key.clone();
        let cache_key = CacheKey::builder("sector_returns")
            .dataset(&key)
            .param("period", period.label())
            .build();

        let precomputed = state.series.is_ready(&key, SeriesKind::StockReturns);
        Self::serve(state, &dataset, cache_key, move |store| {
            let returns = Self::read_stock_returns(store, &key, period, precomputed)?;
            Ok(series_service::sector_returns(&returns))
        })
        .await
    }

    /// Index-level daily prices
    pub async fn get_index_prices(
        state: &AppState,
        symbol: Option<&str>,
        range: Option<DateRange>,
    ) -> Result<QueryResult<IndexPriceRow>> {
        let dataset = state.catalog.resolve(INDEX_PRICES_KEY)?.clone();
        let cache_key = CacheKey::builder("index_prices")
            .dataset(&dataset.key)
            .param_opt("symbol", symbol)
            .param_opt("range", range.map(|r| r.cache_repr()))
            .build();

        let symbol = symbol.map(str::to_string);
        Self::serve(state, &dataset, cache_key, move |store| {
            store.query_index_prices(symbol.as_deref(), range)
        })
        .await
    }

    /// Latest close per market index with its previous close
    pub async fn get_latest_index_prices(state: &AppState) -> Result<QueryResult<IndexSnapshotRow>> {
        let dataset = state.catalog.resolve(INDEX_PRICES_KEY)?.clone();
        let cache_key = CacheKey::builder("index_prices_latest")
            .dataset(&dataset.key)
            .build();

        Self::serve(state, &dataset, cache_key, |store| store.query_latest_index_prices()).await
    }

    /// Average stock return per sector pooled across several indices.
    ///
    /// An empty `indices` means every loaded index. Requested indices that
    /// are not loaded get a background load and are left out until ready.
    pub async fn get_cross_index_sector_returns(
        state: &AppState,
        indices: &[String],
        period: ReturnPeriod,
    ) -> Result<QueryResult<SectorReturn>> {
        let mut requested = Vec::with_capacity(indices.len());
        for raw in indices {
            requested.push(Self::index_dataset(state, raw)?.key);
        }
        if requested.is_empty() {
            requested = Self::loaded_indices(state);
        }
        requested.sort();
        requested.dedup();

        let ready: Vec<DatasetKey> = requested
            .iter()
            .filter(|key| RefreshOrchestrator::ensure_loaded(state, key) == LazyDecision::Ready)
            .cloned()
            .collect();

        if ready.is_empty() {
            let status = requested
                .first()
                .and_then(|key| state.registry.get_status(key))
                .map(|s| s.status)
                .unwrap_or(LoadStatus::Unloaded);
            return Ok(QueryResult {
                dataset: Self::members_label(&requested),
                status,
                ready: false,
                cached: false,
                data: Vec::new(),
            });
        }

        let label = Self::members_label(&ready);
        let cache_key = CacheKey::builder("cross_sector_returns")
            .param("datasets", label.as_str())
            .param("period", period.label())
            .build();

        if let Some(data) = Self::cached::<SectorReturn>(state, &cache_key)? {
            return Ok(QueryResult::ready(&label, true, data));
        }

        let data = Self::blocking(state, move |store| {
            let rows = store.query_unified_prices(&ready)?;
            Ok(series_service::cross_index_sector_returns(&rows, period))
        })
        .await?;
        state.cache.put(cache_key, serde_json::to_value(&data)?);
        Ok(QueryResult::ready(&label, false, data))
    }

    fn loaded_indices(state: &AppState) -> Vec<DatasetKey> {
        state
            .registry
            .loaded_keys()
            .into_iter()
            .filter(|k| state.catalog.get(k).is_some_and(|d| d.kind == DatasetKind::Index))
            .collect()
    }

    /// Comma-joined keys; cache keys built from it name every member
    fn members_label(keys: &[DatasetKey]) -> String {
        keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",")
    }

    fn read_stock_returns(
        store: &DuckDb,
        key: &DatasetKey,
        period: ReturnPeriod,
        precomputed: bool,
    ) -> Result<Vec<StockReturnRow>> {
        if precomputed && period.is_standard() {
            return store.query_stock_returns(key, &period.label());
        }
        let rows = store.query_prices(key, PriceFilter::default())?;
        Ok(series_service::stock_returns(&rows, period))
    }

    fn index_dataset(state: &AppState, raw: &str) -> Result<DatasetConfig> {
        let dataset = state.catalog.resolve(raw)?;
        if dataset.kind != DatasetKind::Index {
            return Err(AppError::Validation(format!(
                "{} is not an index dataset",
                raw
            )));
        }
        Ok(dataset.clone())
    }

    fn cached<T: DeserializeOwned>(state: &AppState, key: &CacheKey) -> Result<Option<Vec<T>>> {
        match state.cache.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn blocking<T, F>(state: &AppState, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DuckDb) -> Result<T> + Send + 'static,
    {
        let store = state.store.clone();
        tokio::task::spawn_blocking(move || read(&store)).await?
    }

    /// Cache, then registry gate, then store
    async fn serve<T, F>(
        state: &AppState,
        dataset: &DatasetConfig,
        cache_key: CacheKey,
        read: F,
    ) -> Result<QueryResult<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(&DuckDb) -> Result<Vec<T>> + Send + 'static,
    {
        if let Some(data) = Self::cached(state, &cache_key)? {
            return Ok(QueryResult::ready(dataset.key.as_str(), true, data));
        }

        match RefreshOrchestrator::ensure_loaded(state, &dataset.key) {
            LazyDecision::Ready => {}
            decision => {
                debug!("[{}] Not ready ({:?}), serving placeholder", dataset.key, decision);
                return Ok(QueryResult::not_ready(state, &dataset.key));
            }
        }

        let data = Self::blocking(state, read).await?;
        state.cache.put(cache_key, serde_json::to_value(&data)?);
        Ok(QueryResult::ready(dataset.key.as_str(), false, data))
    }
}
