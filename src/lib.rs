//! `decaylab` library crate.
//!
//! The binary (`decaylab`) is a thin wrapper around this library so that:
//!
//! - acquisition and analysis are testable without spawning processes
//! - real instrument drivers can plug into the same loop from another crate
//! - code stays easy to navigate as the project grows

pub mod acquire;
pub mod aggregate;
pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
