//! Market Dashboard - warehouse-backed analytical cache
//!
//! Mirrors per-index daily price datasets from a cloud warehouse into an
//! in-memory DuckDB store, precomputes sector/industry series and stock
//! returns, and serves them over a cached REST API.

pub mod api;
pub mod cache;
pub mod config;
pub mod datasets;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod warehouse;

use crate::config::AppConfig;
use crate::error::Result;
use crate::scheduler::RefreshOrchestrator;
use crate::state::AppState;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize and run the service
pub async fn run() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Market Dashboard...");

    let warehouse = warehouse::warehouse_from_config(&config)?;
    let worker_count = config.worker_count;
    let startup_preload = config.startup_preload;

    let (app_state, jobs) = AppState::new(config, warehouse)?;
    let app_state = Arc::new(app_state);

    RefreshOrchestrator::spawn_workers(app_state.clone(), jobs, worker_count);

    // Preload in the background; the API answers with `ready = false` meanwhile
    if startup_preload {
        tokio::spawn(RefreshOrchestrator::startup_preload(app_state.clone()));
    } else {
        tracing::info!("Startup preload disabled, datasets load on first request");
    }

    api::serve(app_state).await
}
