//! HTTP server for the dashboard REST API

use crate::api::handlers;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router with all routes
pub fn router(state: Arc<AppState>) -> Router {
    // Dashboard frontends are served from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ================================================================
        // Health check
        // ================================================================
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::health_check))

        // ================================================================
        // Admin: refresh triggers
        // ================================================================
        .route("/api/admin/refresh", post(handlers::refresh_all))
        .route("/api/admin/refresh/:key", post(handlers::refresh_dataset))

        // ================================================================
        // Query API v1
        // ================================================================
        .route("/api/v1/prices/:dataset", get(handlers::get_prices))
        .route("/api/v1/latest", get(handlers::get_latest_all))
        .route("/api/v1/latest/:dataset", get(handlers::get_latest))
        .route("/api/v1/sector-series/:dataset", get(handlers::get_sector_series))
        .route("/api/v1/industry-series/:dataset", get(handlers::get_industry_series))
        .route("/api/v1/stock-returns/:dataset", get(handlers::get_stock_returns))
        .route("/api/v1/sector-returns", get(handlers::get_cross_index_sector_returns))
        .route("/api/v1/sector-returns/:dataset", get(handlers::get_sector_returns))
        .route("/api/v1/index-prices", get(handlers::get_index_prices))
        .route("/api/v1/index-prices/latest", get(handlers::get_latest_index_prices))

        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `bind_address` and serve until the process exits
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .bind_address
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid bind address: {}", e)))?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Market dashboard API listening on {}", addr);
    info!("");
    info!("=== Endpoints ===");
    info!("  GET  /health");
    info!("  POST /api/admin/refresh[/{{key}}]");
    info!("  GET  /api/v1/{{prices,latest,sector-series,industry-series}}/{{dataset}}");
    info!("  GET  /api/v1/{{stock-returns,sector-returns}}/{{dataset}}?period=");
    info!("  GET  /api/v1/sector-returns?indices=&period=");
    info!("  GET  /api/v1/latest, /api/v1/index-prices[/latest]");

    axum::serve(listener, app).await?;
    Ok(())
}
