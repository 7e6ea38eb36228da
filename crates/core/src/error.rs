//! Error taxonomy shared by the journey crates.

use crate::checkpoint::CheckpointStatus;
use crate::id::{CheckpointId, JourneyId};

/// Result alias for journey operations.
pub type Result<T> = std::result::Result<T, JourneyError>;

/// Errors surfaced by the journey model, the automation engine and the
/// progress store.
#[derive(Debug, thiserror::Error)]
pub enum JourneyError {
    /// Missing journey template, phase or checkpoint
    #[error("Not found: {0}")]
    NotFound(String),

    /// An automation event that cannot be mapped to a checkpoint transition
    #[error("Unrecognized event: {0}")]
    UnrecognizedEvent(String),

    /// Mutation attempted on a checkpoint that is not eligible yet
    #[error("Checkpoint '{checkpoint_id}' in journey '{journey_id}' is locked")]
    CheckpointLocked {
        /// Journey containing the checkpoint
        journey_id: JourneyId,
        /// The locked checkpoint
        checkpoint_id: CheckpointId,
    },

    /// Transition not allowed by the checkpoint state machine
    #[error("Invalid transition for '{checkpoint_id}': {from} ({from_pct}%) -> {to} ({to_pct}%)")]
    InvalidStateTransition {
        /// Checkpoint being mutated
        checkpoint_id: CheckpointId,
        /// Current status
        from: CheckpointStatus,
        /// Current percentage
        from_pct: u8,
        /// Requested status
        to: CheckpointStatus,
        /// Requested percentage
        to_pct: u8,
    },

    /// Record violates the status/percentage invariant
    #[error("Invalid checkpoint state: {0}")]
    InvalidState(String),

    /// Malformed journey template
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Concurrent write lost the optimistic-concurrency race
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend failure in the progress store
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

impl JourneyError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            JourneyError::NotFound(_) => "not_found",
            JourneyError::UnrecognizedEvent(_) => "unrecognized_event",
            JourneyError::CheckpointLocked { .. } => "checkpoint_locked",
            JourneyError::InvalidStateTransition { .. } => "invalid_state_transition",
            JourneyError::InvalidState(_) => "invalid_state",
            JourneyError::InvalidTemplate(_) => "invalid_template",
            JourneyError::Conflict(_) => "conflict",
            JourneyError::PersistenceError(_) => "persistence_error",
        }
    }
}
