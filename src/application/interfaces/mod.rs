mod aggregate_store;
mod raw_embedding_repository;

pub use aggregate_store::*;
pub use raw_embedding_repository::*;
