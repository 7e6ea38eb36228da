//! Journey and phase model with derived progress.
//!
//! Phase and journey percentages are never stored. They are computed from
//! children whenever asked for, including at serialization time.

use serde::{Deserialize, Serialize};
use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::error::{JourneyError, Result};
use crate::id::{CheckpointId, JourneyId, PhaseId, UserId};

/// Ordered group of checkpoints sharing a theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "PhaseWire", from = "PhaseWire")]
pub struct Phase {
    /// Identifier, unique within the journey
    pub id: PhaseId,

    /// Display name
    pub name: String,

    /// Checkpoints in template order
    pub checkpoints: Vec<Checkpoint>,
}

impl Phase {
    /// Mean of child checkpoint percentages.
    pub fn completion_percentage(&self) -> u8 {
        compute_phase_progress(self)
    }

    /// Whether every checkpoint is completed. Empty phases are not complete.
    pub fn is_complete(&self) -> bool {
        !self.checkpoints.is_empty()
            && self
                .checkpoints
                .iter()
                .all(|c| c.status == CheckpointStatus::Completed)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseWire {
    id: PhaseId,
    name: String,
    #[serde(default)]
    completion_percentage: u8,
    checkpoints: Vec<Checkpoint>,
}

impl From<Phase> for PhaseWire {
    fn from(phase: Phase) -> Self {
        Self {
            completion_percentage: phase.completion_percentage(),
            id: phase.id,
            name: phase.name,
            checkpoints: phase.checkpoints,
        }
    }
}

impl From<PhaseWire> for Phase {
    fn from(wire: PhaseWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            checkpoints: wire.checkpoints,
        }
    }
}

/// One user's instantiated track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "JourneyWire", from = "JourneyWire")]
pub struct Journey {
    /// Journey template id
    pub id: JourneyId,

    /// Owner
    pub user_id: UserId,

    /// Display name
    pub name: String,

    /// Description
    pub description: String,

    /// Phases in navigation order
    pub phases: Vec<Phase>,
}

impl Journey {
    /// Mean of phase percentages.
    pub fn overall_progress(&self) -> u8 {
        compute_journey_progress(self)
    }

    /// Whether every checkpoint of every phase is completed.
    ///
    /// Decided from statuses, not from the rounded percentage.
    pub fn is_complete(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().all(Phase::is_complete)
    }

    /// Find the phase holding `checkpoint_id`, returning (phase index, checkpoint index).
    pub fn locate(&self, checkpoint_id: &CheckpointId) -> Option<(usize, usize)> {
        self.phases.iter().enumerate().find_map(|(pi, phase)| {
            phase
                .checkpoints
                .iter()
                .position(|c| &c.id == checkpoint_id)
                .map(|ci| (pi, ci))
        })
    }

    /// Look up a phase by id.
    pub fn phase(&self, phase_id: &PhaseId) -> Option<&Phase> {
        self.phases.iter().find(|p| &p.id == phase_id)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JourneyWire {
    id: JourneyId,
    user_id: UserId,
    name: String,
    description: String,
    #[serde(default)]
    overall_progress: u8,
    phases: Vec<Phase>,
}

impl From<Journey> for JourneyWire {
    fn from(journey: Journey) -> Self {
        Self {
            overall_progress: journey.overall_progress(),
            id: journey.id,
            user_id: journey.user_id,
            name: journey.name,
            description: journey.description,
            phases: journey.phases,
        }
    }
}

impl From<JourneyWire> for Journey {
    fn from(wire: JourneyWire) -> Self {
        Self {
            id: wire.id,
            user_id: wire.user_id,
            name: wire.name,
            description: wire.description,
            phases: wire.phases,
        }
    }
}

/// Mean of `values` rounded half-up; 0 for an empty input.
fn rounded_mean(values: impl Iterator<Item = u8>) -> u8 {
    let (sum, count) = values.fold((0u32, 0u32), |(s, n), v| (s + u32::from(v), n + 1));
    if count == 0 {
        return 0;
    }
    let mean = (2 * sum + count) / (2 * count);
    mean.min(100) as u8
}

/// Phase progress: rounded mean of checkpoint percentages, 0 when empty.
pub fn compute_phase_progress(phase: &Phase) -> u8 {
    rounded_mean(phase.checkpoints.iter().map(|c| c.completion_percentage))
}

/// Journey progress: rounded mean of phase progress values, 0 when empty.
///
/// Every phase weighs the same regardless of how many checkpoints it has.
pub fn compute_journey_progress(journey: &Journey) -> u8 {
    rounded_mean(journey.phases.iter().map(compute_phase_progress))
}

/// Look up a checkpoint by phase and checkpoint id.
pub fn find_checkpoint<'a>(
    journey: &'a Journey,
    phase_id: &PhaseId,
    checkpoint_id: &CheckpointId,
) -> Result<&'a Checkpoint> {
    let phase = journey.phase(phase_id).ok_or_else(|| {
        JourneyError::NotFound(format!("phase '{}' in journey '{}'", phase_id, journey.id))
    })?;
    phase
        .checkpoints
        .iter()
        .find(|c| &c.id == checkpoint_id)
        .ok_or_else(|| {
            JourneyError::NotFound(format!(
                "checkpoint '{}' in phase '{}'",
                checkpoint_id, phase_id
            ))
        })
}
