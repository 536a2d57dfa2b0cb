//! Folder aggregation: fit every persisted sweep of a measurement and merge
//! the results into one time-sorted table.

pub mod folder;

pub use folder::*;
