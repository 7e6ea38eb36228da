//! Journey core data models.
//!
//! This crate defines the journey -> phase -> checkpoint hierarchy, the
//! checkpoint state machine, the static templates journeys are built from,
//! and the deltas pushed to live clients.

#![warn(missing_docs)]

// Core identities
mod id;
mod error;

// Journey model
mod checkpoint;
mod journey;
mod template;

// Realtime payloads
mod delta;

// Re-exports
pub use id::*;
pub use error::{JourneyError, Result};

pub use checkpoint::{
    plan_transition, validate_pair, Checkpoint, CheckpointState, CheckpointStatus, Metadata,
    TransitionPlan,
};
pub use journey::{compute_journey_progress, compute_phase_progress, find_checkpoint, Journey, Phase};
pub use template::{
    CheckpointLocation, CheckpointTemplate, JourneyTemplate, PhaseTemplate, TemplateCatalog,
};
pub use delta::{CheckpointDelta, JourneyDelta, PhaseDelta, ProgressDelta};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
