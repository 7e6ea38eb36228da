//! Journey Model (read side)
//!
//! Journey reconstruction from templates plus stored state, and derived
//! progress snapshots.

#![warn(missing_docs)]

pub mod tracker;

pub use tracker::{JourneyTracker, ProgressSnapshot};
