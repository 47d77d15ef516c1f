//! Background load scheduling
//!
//! Handles:
//! - Startup preload of every configured dataset
//! - Lazy loads triggered by queries against unloaded datasets
//! - Explicit refreshes from the admin API

pub mod refresh;

pub use refresh::{
    LoadJob, LoadReport, LoadTrigger, RefreshAck, RefreshOrchestrator, RefreshStatus, RefreshTarget,
};
