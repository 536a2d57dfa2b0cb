//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - captured sweeps and their auxiliary context (`SweepRecord`, `SweepContext`)
//! - fit outputs (`FitResult`, `AggregateTable`)
//! - run configuration enums (`SweepBound`, `ExecutionMode`, `LoopState`)

pub mod types;

pub use types::*;
