//! Decay model implementation.
//!
//! The model is implemented as small, pure functions so that fitting code can
//! stay focused on the optimizer.

pub mod model;

pub use model::*;
