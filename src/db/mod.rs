//! Storage layer: the in-memory DuckDB analytical store

pub mod duckdb;

pub use self::duckdb::DuckDb;
