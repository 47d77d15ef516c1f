//! REST API endpoint handlers
//!
//! Thin adapters: parse parameters, call a service, serialize the result.
//! Handlers never wait on a dataset load.

use crate::api::types::{CrossIndexQuery, PeriodQuery, PriceQuery, SeriesQuery};
use crate::db::duckdb::models::{
    IndexPriceRow, IndexSnapshotRow, IndustrySeriesPoint, PriceRow, SectorReturn,
    SectorSeriesPoint, SnapshotRow, StockReturnRow,
};
use crate::error::{AppError, Result};
use crate::scheduler::refresh::{RefreshAck, RefreshOrchestrator, RefreshStatus, RefreshTarget};
use crate::services::health_service::{HealthReport, HealthService};
use crate::services::query_service::{MarketQueryService, QueryResult};
use crate::state::AppState;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

type ApiState = State<Arc<AppState>>;

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint - GET /health
pub async fn health_check(State(state): ApiState) -> Json<HealthReport> {
    Json(HealthService::report(&state).await)
}

// ============================================================================
// Admin
// ============================================================================

/// Refresh every loaded dataset - POST /api/admin/refresh
pub async fn refresh_all(State(state): ApiState) -> impl IntoResponse {
    info!("Refresh requested for all loaded datasets");
    ack_response(RefreshOrchestrator::trigger_refresh(&state, RefreshTarget::All))
}

/// Refresh one dataset - POST /api/admin/refresh/{key}
pub async fn refresh_dataset(State(state): ApiState, Path(key): Path<String>) -> impl IntoResponse {
    info!("Refresh requested for {}", key);
    ack_response(RefreshOrchestrator::trigger_refresh(&state, RefreshTarget::parse(&key)))
}

fn ack_response(ack: RefreshAck) -> (StatusCode, Json<RefreshAck>) {
    let status = match ack.status {
        RefreshStatus::Accepted => StatusCode::ACCEPTED,
        RefreshStatus::Skipped => StatusCode::OK,
        RefreshStatus::Error => StatusCode::NOT_FOUND,
    };
    (status, Json(ack))
}

// ============================================================================
// Query API v1
// ============================================================================

/// GET /api/v1/prices/{dataset}?symbol=&start=&end=
pub async fn get_prices(
    State(state): ApiState,
    Path(dataset): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<QueryResult<PriceRow>>> {
    let range = query.range()?;
    let result = MarketQueryService::get_prices(&state, &dataset, query.symbol(), range).await?;
    Ok(Json(result))
}

/// GET /api/v1/latest/{dataset}
pub async fn get_latest(
    State(state): ApiState,
    Path(dataset): Path<String>,
) -> Result<Json<QueryResult<SnapshotRow>>> {
    Ok(Json(MarketQueryService::get_latest_snapshot(&state, &dataset).await?))
}

/// GET /api/v1/latest
pub async fn get_latest_all(State(state): ApiState) -> Result<Json<QueryResult<SnapshotRow>>> {
    Ok(Json(MarketQueryService::get_latest_snapshot_all(&state).await?))
}

/// GET /api/v1/sector-series/{dataset}?sector=
pub async fn get_sector_series(
    State(state): ApiState,
    Path(dataset): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<QueryResult<SectorSeriesPoint>>> {
    let result = MarketQueryService::get_sector_series(&state, &dataset, query.sector()).await?;
    Ok(Json(result))
}

/// GET /api/v1/industry-series/{dataset}?sector=&industry=
pub async fn get_industry_series(
    State(state): ApiState,
    Path(dataset): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<QueryResult<IndustrySeriesPoint>>> {
    let sector = query
        .sector()
        .ok_or_else(|| AppError::Validation("sector is required".to_string()))?;
    let result =
        MarketQueryService::get_industry_series(&state, &dataset, sector, query.industry()).await?;
    Ok(Json(result))
}

/// GET /api/v1/stock-returns/{dataset}?period=1y
pub async fn get_stock_returns(
    State(state): ApiState,
    Path(dataset): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<QueryResult<StockReturnRow>>> {
    let period = query.period()?;
    Ok(Json(MarketQueryService::get_stock_returns(&state, &dataset, period).await?))
}

/// GET /api/v1/sector-returns/{dataset}?period=1y
pub async fn get_sector_returns(
    State(state): ApiState,
    Path(dataset): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<QueryResult<SectorReturn>>> {
    let period = query.period()?;
    Ok(Json(MarketQueryService::get_sector_returns(&state, &dataset, period).await?))
}

/// GET /api/v1/sector-returns?indices=&period=1y
pub async fn get_cross_index_sector_returns(
    State(state): ApiState,
    Query(query): Query<CrossIndexQuery>,
) -> Result<Json<QueryResult<SectorReturn>>> {
    let period = query.period()?;
    let result =
        MarketQueryService::get_cross_index_sector_returns(&state, &query.indices(), period).await?;
    Ok(Json(result))
}

/// GET /api/v1/index-prices/latest
pub async fn get_latest_index_prices(
    State(state): ApiState,
) -> Result<Json<QueryResult<IndexSnapshotRow>>> {
    Ok(Json(MarketQueryService::get_latest_index_prices(&state).await?))
}

/// GET /api/v1/index-prices?symbol=&start=&end=
pub async fn get_index_prices(
    State(state): ApiState,
    Query(query): Query<PriceQuery>,
) -> Result<Json<QueryResult<IndexPriceRow>>> {
    let range = query.range()?;
    Ok(Json(MarketQueryService::get_index_prices(&state, query.symbol(), range).await?))
}
