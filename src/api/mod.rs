//! REST API server module
//!
//! Provides:
//! - Health and warm-up progress (/health)
//! - Refresh triggers (/api/admin/refresh)
//! - Dashboard queries (/api/v1/*)

pub mod handlers;
mod server;
pub mod types;

pub use server::{router, serve};
