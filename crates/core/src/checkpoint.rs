//! Checkpoint model - the atomic, individually completable unit of work.

use serde::{Deserialize, Serialize};
use crate::error::{JourneyError, Result};
use crate::id::CheckpointId;
use crate::Time;

/// Open key/value bag stored alongside a checkpoint. Never interpreted here.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Checkpoint status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointStatus {
    /// Not started yet
    NotStarted,
    /// Work underway
    InProgress,
    /// Waiting for a reviewer
    NeedsReview,
    /// Done
    Completed,
}

impl CheckpointStatus {
    /// Position in the forward-only state machine.
    pub fn rank(self) -> u8 {
        match self {
            CheckpointStatus::NotStarted => 0,
            CheckpointStatus::InProgress => 1,
            CheckpointStatus::NeedsReview => 2,
            CheckpointStatus::Completed => 3,
        }
    }

    /// Wire name (`not-started`, `in-progress`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::NotStarted => "not-started",
            CheckpointStatus::InProgress => "in-progress",
            CheckpointStatus::NeedsReview => "needs-review",
            CheckpointStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not-started" => Ok(CheckpointStatus::NotStarted),
            "in-progress" => Ok(CheckpointStatus::InProgress),
            "needs-review" => Ok(CheckpointStatus::NeedsReview),
            "completed" => Ok(CheckpointStatus::Completed),
            other => Err(JourneyError::InvalidState(format!(
                "unknown checkpoint status '{}'",
                other
            ))),
        }
    }
}

/// Persisted per-user state of one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    /// Current status
    pub status: CheckpointStatus,

    /// Completion percentage (0-100)
    pub completion_percentage: u8,

    /// Unlocked for user-initiated start
    pub eligible: bool,

    /// Automation-supplied context
    #[serde(default)]
    pub metadata: Metadata,

    /// Last write time; `None` until the first write
    pub updated_at: Option<Time>,

    /// Write counter used for optimistic concurrency
    #[serde(default)]
    pub revision: u64,
}

impl CheckpointState {
    /// State of a checkpoint nobody has touched yet.
    pub fn initial(eligible: bool) -> Self {
        Self {
            status: CheckpointStatus::NotStarted,
            completion_percentage: 0,
            eligible,
            metadata: Metadata::new(),
            updated_at: None,
            revision: 0,
        }
    }

    /// Check the status/percentage invariant.
    pub fn validate(&self) -> Result<()> {
        validate_pair(self.status, self.completion_percentage)
    }

    /// Whether the checkpoint is done.
    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}

/// Check that a status/percentage pair can be stored.
///
/// `completed` and 100% imply each other; `not-started` is always 0%.
pub fn validate_pair(status: CheckpointStatus, percentage: u8) -> Result<()> {
    if percentage > 100 {
        return Err(JourneyError::InvalidState(format!(
            "completion percentage {} exceeds 100",
            percentage
        )));
    }
    match (status, percentage) {
        (CheckpointStatus::Completed, 100) => Ok(()),
        (CheckpointStatus::Completed, p) => Err(JourneyError::InvalidState(format!(
            "completed checkpoint must be at 100%, got {}%",
            p
        ))),
        (s, 100) => Err(JourneyError::InvalidState(format!(
            "{} checkpoint cannot be at 100%",
            s
        ))),
        (CheckpointStatus::NotStarted, p) if p != 0 => Err(JourneyError::InvalidState(format!(
            "not-started checkpoint must be at 0%, got {}%",
            p
        ))),
        _ => Ok(()),
    }
}

/// Outcome of planning a forward transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Target equals the current state; nothing to write
    NoOp,
    /// Valid forward move
    Forward,
}

/// Decide whether `current` may move to `(to, to_pct)`.
///
/// Moves go strictly up the status rank, except that an in-progress
/// checkpoint may raise its percentage. Resets are not transitions.
pub fn plan_transition(
    checkpoint_id: &CheckpointId,
    current: &CheckpointState,
    to: CheckpointStatus,
    to_pct: u8,
) -> Result<TransitionPlan> {
    validate_pair(to, to_pct)?;

    let from = current.status;
    let from_pct = current.completion_percentage;

    if from == to && from_pct == to_pct {
        return Ok(TransitionPlan::NoOp);
    }

    let forward = to.rank() > from.rank()
        || (from == to && to == CheckpointStatus::InProgress && to_pct >= from_pct);

    if forward {
        Ok(TransitionPlan::Forward)
    } else {
        Err(JourneyError::InvalidStateTransition {
            checkpoint_id: checkpoint_id.clone(),
            from,
            from_pct,
            to,
            to_pct,
        })
    }
}

/// A checkpoint as presented to readers: template content merged with
/// the user's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Identifier, unique within the journey
    pub id: CheckpointId,

    /// Display name
    pub name: String,

    /// Description
    pub description: String,

    /// Current status
    pub status: CheckpointStatus,

    /// Completion percentage (0-100)
    pub completion_percentage: u8,

    /// Unlocked for user-initiated start
    pub eligible: bool,

    /// Automation-supplied context
    pub metadata: Metadata,

    /// Last write time
    pub updated_at: Option<Time>,
}
