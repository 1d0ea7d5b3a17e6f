mod aggregate;
mod checkpoint;
mod embedding;
mod id_range;
mod partition;
mod raw_record;
mod run_report;

pub use aggregate::*;
pub use checkpoint::*;
pub use embedding::*;
pub use id_range::*;
pub use partition::*;
pub use raw_record::*;
pub use run_report::*;
