//! Sweep acquisition.
//!
//! - collaborator traits and the `Rig` that owns them (`rig`)
//! - the arm / wait / read / persist loop (`run_loop`)
//! - simulated collaborators for running without hardware (`simulated`)

pub mod rig;
pub mod run_loop;
pub mod simulated;

pub use rig::*;
pub use run_loop::*;
pub use simulated::*;
