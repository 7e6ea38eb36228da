//! Progress store trait abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use journey_core::{CheckpointId, CheckpointKey, CheckpointState, JourneyError, JourneyId, UserId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Optimistic concurrency check failed
    #[error("Conflict on {key}: expected revision {expected}, found {actual}")]
    Conflict {
        /// Record key
        key: CheckpointKey,
        /// Revision the writer read
        expected: u64,
        /// Revision currently stored
        actual: u64,
    },

    /// Record breaks the status/percentage invariant
    #[error("Invalid state for {key}: {reason}")]
    InvalidState {
        /// Record key
        key: CheckpointKey,
        /// What is wrong
        reason: String,
    },

    /// Other backend failure
    #[error("{0}")]
    Backend(String),
}

impl From<StorageError> for JourneyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { .. } => JourneyError::Conflict(err.to_string()),
            StorageError::InvalidState { .. } => JourneyError::InvalidState(err.to_string()),
            other => JourneyError::PersistenceError(other.to_string()),
        }
    }
}

/// Durable per-user checkpoint state.
///
/// Writes to a single key are atomic and totally ordered by `updated_at`
/// (and `revision`). Nothing is promised across different keys.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Load one checkpoint's state; `None` if it was never written.
    async fn get_checkpoint_state(&self, key: &CheckpointKey) -> Result<Option<CheckpointState>>;

    /// Write a checkpoint's state.
    ///
    /// With `expected_revision` set, the write fails with
    /// [`StorageError::Conflict`] unless the stored revision matches
    /// (0 for a missing record). Returns the state as stored, with
    /// `revision` and `updated_at` assigned by the store.
    async fn set_checkpoint_state(
        &self,
        key: &CheckpointKey,
        state: CheckpointState,
        expected_revision: Option<u64>,
    ) -> Result<CheckpointState>;

    /// All stored states of one user's journey, keyed by checkpoint.
    async fn list_checkpoint_states(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
    ) -> Result<HashMap<CheckpointId, CheckpointState>>;
}

/// Validate and stamp a write against the currently stored record.
///
/// Shared by every backend so they agree on invariants and ordering.
pub fn prepare_write(
    key: &CheckpointKey,
    current: Option<&CheckpointState>,
    mut state: CheckpointState,
    expected_revision: Option<u64>,
) -> Result<CheckpointState> {
    state.validate().map_err(|e| StorageError::InvalidState {
        key: key.clone(),
        reason: e.to_string(),
    })?;

    let actual = current.map(|c| c.revision).unwrap_or(0);
    if let Some(expected) = expected_revision {
        if expected != actual {
            return Err(StorageError::Conflict {
                key: key.clone(),
                expected,
                actual,
            });
        }
    }

    let mut now = Utc::now();
    if let Some(previous) = current.and_then(|c| c.updated_at) {
        if now <= previous {
            now = previous + chrono::Duration::microseconds(1);
        }
    }

    state.revision = actual + 1;
    state.updated_at = Some(now);
    Ok(state)
}
