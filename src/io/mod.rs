//! Input/output helpers.
//!
//! - sweep container storage (`sweep_store`)
//! - aggregate table export (`aggregate`)

pub mod aggregate;
pub mod sweep_store;

pub use aggregate::*;
pub use sweep_store::*;
