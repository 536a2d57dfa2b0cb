//! Decay fitting.
//!
//! Responsibilities:
//!
//! - condition a raw trace (optional time shift / rejection window)
//! - fit the mono-exponential model with bounded failure

pub mod fitter;
pub mod preprocess;

pub use fitter::*;
pub use preprocess::*;
