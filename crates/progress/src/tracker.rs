//! Journey progress tracking service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use journey_core::{
    compute_journey_progress, compute_phase_progress, find_checkpoint, Checkpoint, CheckpointId,
    Journey, JourneyId, PhaseId, Result, TemplateCatalog, UserId,
};
use journey_storage::ProgressStore;
use serde::Serialize;
use tracing::debug;

/// Reconstructs journeys from templates and stored checkpoint state.
///
/// Holds no state of its own; every call reads through to the store.
#[derive(Clone)]
pub struct JourneyTracker {
    store: Arc<dyn ProgressStore>,
    catalog: Arc<TemplateCatalog>,
}

impl JourneyTracker {
    /// Create a tracker over `store` using `catalog` for templates.
    pub fn new(store: Arc<dyn ProgressStore>, catalog: Arc<TemplateCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Template catalog in use.
    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Merge the template with the user's stored state.
    ///
    /// Fails with `NotFound` if the template does not exist.
    pub async fn load_journey(&self, user_id: &UserId, journey_id: &JourneyId) -> Result<Journey> {
        let template = self.catalog.get(journey_id)?;
        let states = self.store.list_checkpoint_states(user_id, journey_id).await?;
        debug!(
            user_id = %user_id,
            journey_id = %journey_id,
            stored = states.len(),
            "loaded journey state"
        );
        Ok(template.instantiate(user_id, &states))
    }

    /// Load a journey and return one of its checkpoints.
    pub async fn find_checkpoint(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        phase_id: &PhaseId,
        checkpoint_id: &CheckpointId,
    ) -> Result<Checkpoint> {
        let journey = self.load_journey(user_id, journey_id).await?;
        find_checkpoint(&journey, phase_id, checkpoint_id).cloned()
    }

    /// Load a journey and summarize its derived percentages.
    pub async fn snapshot(&self, user_id: &UserId, journey_id: &JourneyId) -> Result<ProgressSnapshot> {
        let journey = self.load_journey(user_id, journey_id).await?;
        Ok(ProgressSnapshot::of(&journey))
    }
}

/// Derived percentages of a journey at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// When snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Journey
    pub journey_id: JourneyId,

    /// Journey percentage
    pub overall_progress: u8,

    /// Phase percentages in journey order
    pub phase_progress: Vec<(PhaseId, u8)>,

    /// Every checkpoint is completed
    pub complete: bool,
}

impl ProgressSnapshot {
    /// Summarize an already loaded journey.
    pub fn of(journey: &Journey) -> Self {
        Self {
            timestamp: Utc::now(),
            journey_id: journey.id.clone(),
            overall_progress: compute_journey_progress(journey),
            phase_progress: journey
                .phases
                .iter()
                .map(|p| (p.id.clone(), compute_phase_progress(p)))
                .collect(),
            complete: journey.is_complete(),
        }
    }

    /// Percentage of one phase, if present.
    pub fn phase(&self, phase_id: &PhaseId) -> Option<u8> {
        self.phase_progress
            .iter()
            .find(|(id, _)| id == phase_id)
            .map(|(_, pct)| *pct)
    }

    /// Phases whose percentage differs from `earlier`, with the new value.
    pub fn changed_phases(&self, earlier: &ProgressSnapshot) -> Vec<(PhaseId, u8)> {
        self.phase_progress
            .iter()
            .filter(|(id, pct)| earlier.phase(id) != Some(*pct))
            .cloned()
            .collect()
    }

    /// Whether the journey is fully complete.
    ///
    /// A journey can round to 100% while a checkpoint is still open.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::{CheckpointKey, CheckpointState, CheckpointStatus, JourneyError};
    use journey_storage::MemoryStore;

    fn tracker() -> (JourneyTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = JourneyTracker::new(store.clone(), Arc::new(TemplateCatalog::builtin()));
        (tracker, store)
    }

    fn state(status: CheckpointStatus, pct: u8) -> CheckpointState {
        CheckpointState {
            status,
            completion_percentage: pct,
            ..CheckpointState::initial(true)
        }
    }

    #[tokio::test]
    async fn test_load_unknown_template_fails() {
        let (tracker, _) = tracker();
        let err = tracker
            .load_journey(&UserId::new("u1"), &JourneyId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_fresh_journey() {
        let (tracker, _) = tracker();
        let journey = tracker
            .load_journey(&UserId::new("u1"), &JourneyId::new("vr4deaf"))
            .await
            .unwrap();
        assert_eq!(journey.phases.len(), 5);
        assert_eq!(journey.overall_progress(), 0);
        assert!(journey.phases[0].checkpoints.iter().all(|c| c.eligible));
        assert!(journey.phases[1].checkpoints.iter().all(|c| !c.eligible));
    }

    #[tokio::test]
    async fn test_load_merges_store_state() {
        let (tracker, store) = tracker();
        let user = "u1";
        let journey_id = "business-magician";
        store
            .set_checkpoint_state(
                &CheckpointKey::new(user, journey_id, "business-vision"),
                state(CheckpointStatus::Completed, 100),
                None,
            )
            .await
            .unwrap();
        store
            .set_checkpoint_state(
                &CheckpointKey::new(user, journey_id, "financial-setup"),
                state(CheckpointStatus::InProgress, 60),
                None,
            )
            .await
            .unwrap();

        let snapshot = tracker
            .snapshot(&UserId::new(user), &JourneyId::new(journey_id))
            .await
            .unwrap();
        assert_eq!(snapshot.phase(&PhaseId::new("idea")), Some(100));
        assert_eq!(snapshot.phase(&PhaseId::new("build")), Some(30));
        // (100 + 30 + 0 + 0) / 4 = 32.5
        assert_eq!(snapshot.overall_progress, 33);
        assert!(!snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_find_checkpoint_in_phase() {
        let (tracker, _) = tracker();
        let user = UserId::new("u1");
        let journey_id = JourneyId::new("business-magician");

        let found = tracker
            .find_checkpoint(&user, &journey_id, &PhaseId::new("build"), &CheckpointId::new("financial-setup"))
            .await
            .unwrap();
        assert_eq!(found.status, CheckpointStatus::NotStarted);
        assert!(!found.eligible);

        let err = tracker
            .find_checkpoint(&user, &journey_id, &PhaseId::new("idea"), &CheckpointId::new("financial-setup"))
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshot_at_99_is_not_complete() {
        let (tracker, store) = tracker();
        let user = UserId::new("u1");
        let journey_id = JourneyId::new("job-magician");
        let template = tracker.catalog().get(&journey_id).unwrap();

        for phase in &template.phases {
            for checkpoint in &phase.checkpoints {
                let pct = if checkpoint.id.as_str() == "job-app-followup" { 99 } else { 100 };
                let status = if pct == 100 {
                    CheckpointStatus::Completed
                } else {
                    CheckpointStatus::InProgress
                };
                store
                    .set_checkpoint_state(
                        &CheckpointKey::new("u1", "job-magician", checkpoint.id.as_str()),
                        state(status, pct),
                        None,
                    )
                    .await
                    .unwrap();
            }
        }

        let snapshot = tracker.snapshot(&user, &journey_id).await.unwrap();
        assert_eq!(snapshot.overall_progress, 100);
        assert!(!snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_changed_phases() {
        let (tracker, store) = tracker();
        let user = UserId::new("u1");
        let journey_id = JourneyId::new("job-magician");

        let before = tracker.snapshot(&user, &journey_id).await.unwrap();
        store
            .set_checkpoint_state(
                &CheckpointKey::new("u1", "job-magician", "career-mapping"),
                state(CheckpointStatus::Completed, 100),
                None,
            )
            .await
            .unwrap();
        let after = tracker.snapshot(&user, &journey_id).await.unwrap();

        assert_eq!(
            after.changed_phases(&before),
            vec![(PhaseId::new("assessment"), 100)]
        );
        assert_eq!(after.overall_progress, 20);
    }
}
