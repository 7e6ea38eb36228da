//! Progress deltas pushed to live subscribers.

use serde::{Deserialize, Serialize};
use crate::checkpoint::{CheckpointStatus, Metadata};
use crate::id::{CheckpointId, JourneyId, PhaseId};

/// A single state change notification.
///
/// Serializes as `{"type": "checkpoint_updated", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressDelta {
    /// A checkpoint's state changed (including becoming eligible)
    CheckpointUpdated(CheckpointDelta),
    /// A phase's derived percentage changed
    PhaseUpdated(PhaseDelta),
    /// The journey reached 100%
    JourneyCompleted(JourneyDelta),
}

impl ProgressDelta {
    /// Wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressDelta::CheckpointUpdated(_) => "checkpoint_updated",
            ProgressDelta::PhaseUpdated(_) => "phase_updated",
            ProgressDelta::JourneyCompleted(_) => "journey_completed",
        }
    }

    /// Journey the delta belongs to.
    pub fn journey_id(&self) -> &JourneyId {
        match self {
            ProgressDelta::CheckpointUpdated(d) => &d.journey_id,
            ProgressDelta::PhaseUpdated(d) => &d.journey_id,
            ProgressDelta::JourneyCompleted(d) => &d.journey_id,
        }
    }
}

/// New state of one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDelta {
    /// Journey
    pub journey_id: JourneyId,
    /// Phase holding the checkpoint
    pub phase_id: PhaseId,
    /// Checkpoint
    pub checkpoint_id: CheckpointId,
    /// New status
    pub status: CheckpointStatus,
    /// New percentage
    pub completion_percentage: u8,
    /// Eligibility after the change
    pub eligible: bool,
    /// Metadata after the change
    pub metadata: Metadata,
}

/// Recomputed phase percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDelta {
    /// Journey
    pub journey_id: JourneyId,
    /// Phase
    pub phase_id: PhaseId,
    /// Phase percentage after the change
    pub completion_percentage: u8,
    /// Journey percentage after the change
    pub overall_progress: u8,
}

/// Journey completion notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyDelta {
    /// Journey
    pub journey_id: JourneyId,
    /// Always 100
    pub overall_progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let delta = ProgressDelta::PhaseUpdated(PhaseDelta {
            journey_id: JourneyId::new("business-magician"),
            phase_id: PhaseId::new("build"),
            completion_percentage: 50,
            overall_progress: 38,
        });
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["type"], "phase_updated");
        assert_eq!(json["data"]["phaseId"], "build");
        assert_eq!(json["data"]["completionPercentage"], 50);
        assert_eq!(delta.kind(), "phase_updated");
    }

    #[test]
    fn test_journey_completed_wire_shape() {
        let delta = ProgressDelta::JourneyCompleted(JourneyDelta {
            journey_id: JourneyId::new("job-magician"),
            overall_progress: 100,
        });
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["type"], "journey_completed");
        assert_eq!(json["data"]["journeyId"], "job-magician");
    }
}
