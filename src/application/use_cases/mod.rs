mod import_raw_embeddings;
mod list_group_aggregates;
mod partition_status;
mod refresh_group_embeddings;

pub use import_raw_embeddings::*;
pub use list_group_aggregates::*;
pub use partition_status::*;
pub use refresh_group_embeddings::*;
