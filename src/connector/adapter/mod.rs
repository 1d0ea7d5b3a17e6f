mod duckdb_aggregate_store;
mod duckdb_raw_embedding_repository;
mod duckdb_support;
mod in_memory_aggregate_store;
mod in_memory_raw_embedding_repository;

pub use duckdb_aggregate_store::*;
pub use duckdb_raw_embedding_repository::*;
pub use in_memory_aggregate_store::*;
pub use in_memory_raw_embedding_repository::*;
