//! # Connector Layer
//!
//! Storage adapters implementing the application ports:
//! - DuckDB for the raw table, group aggregates and checkpoints
//! - In-memory stores for tests and throwaway runs

pub mod adapter;
pub mod api;

pub use adapter::*;
pub use api::*;
