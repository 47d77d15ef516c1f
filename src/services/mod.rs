//! Services Layer
//!
//! Business logic behind the REST API handlers and the load workers.
//!
//! # Architecture
//!
//! ```text
//! REST API ──> MarketQueryService ──> Cache / DuckDB
//!                    │
//!                    └──> RefreshOrchestrator ──> DatasetLoader ──> Warehouse
//!                                              └─> SeriesService
//! ```
//!
//! # Services
//!
//! - `DatasetLoader` - Fetch, dedup and swap a dataset's tables
//! - `SeriesService` - Sector/industry series and stock returns precompute
//! - `MarketQueryService` - Cached, registry-gated read paths
//! - `HealthService` - Warm-up progress and store statistics

pub mod loader_service;
pub mod series_service;
pub mod query_service;
pub mod health_service;

// Re-export commonly used types and services
pub use loader_service::{DatasetLoader, LoadError, LoadOutcome};
pub use series_service::{ReturnPeriod, SeriesService};
pub use query_service::{MarketQueryService, QueryResult};
pub use health_service::{DatasetHealth, HealthReport, HealthService};
