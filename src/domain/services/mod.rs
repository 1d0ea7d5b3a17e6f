//! Domain services containing the aggregation logic.

mod partial_aggregator;

pub use partial_aggregator::*;
