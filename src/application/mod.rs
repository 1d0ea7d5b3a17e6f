//! # Application Layer
//!
//! Ports, the transaction coordinator and the use cases driving them.

pub mod interfaces;
mod transaction;
pub mod use_cases;

pub use interfaces::*;
pub use transaction::*;
pub use use_cases::*;
