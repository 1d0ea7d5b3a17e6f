//! # Domain Layer
//!
//! Aggregation models, the merge formula and the batch aggregator.
//! This layer is independent of storage and runtime concerns.

mod error;
pub mod models;
pub mod services;

pub use error::*;
pub use models::*;
pub use services::*;
