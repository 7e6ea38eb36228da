//! Checkpoint automation engine.
//!
//! Turns automation events and user actions into checkpoint writes,
//! unlocks the next phase when one completes, and publishes the resulting
//! deltas. All writes to one user's journey run under a single lock, and
//! every store write is revision-checked.
//!
//! Locked checkpoints only refuse user actions. Automation events report
//! work done outside the journey and write through the lock.

use std::time::Duration;

use chrono::Utc;
use journey_core::{
    plan_transition, CheckpointDelta, CheckpointId, CheckpointKey, CheckpointState,
    CheckpointStatus, EventId, JourneyDelta, JourneyError, JourneyId, JourneyTemplate, Metadata,
    PhaseDelta, PhaseId, ProgressDelta, Result, TransitionPlan, UserId,
};
use journey_progress::{JourneyTracker, ProgressSnapshot};
use journey_realtime::Notifier;
use journey_storage::{KeyedLocks, StorageError};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dedup::IdempotencyCache;
use crate::event::AutomationEvent;
use crate::rules::RuleTable;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Maximum remembered idempotency keys
    pub dedup_capacity: usize,
    /// How long an idempotency key is remembered
    pub dedup_ttl: Duration,
    /// Immediate retries after a revision conflict
    pub conflict_retries: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 10_000,
            dedup_ttl: Duration::from_secs(86_400),
            conflict_retries: 1,
        }
    }
}

/// One checkpoint write and its consequences.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTransition {
    /// Journey
    pub journey_id: JourneyId,
    /// Phase holding the checkpoint
    pub phase_id: PhaseId,
    /// Checkpoint written
    pub checkpoint_id: CheckpointId,
    /// Status before
    pub from: CheckpointStatus,
    /// Percentage before
    pub from_percentage: u8,
    /// Status after
    pub to: CheckpointStatus,
    /// Percentage after
    pub to_percentage: u8,
    /// Checkpoints made eligible by this write
    pub unlocked: Vec<CheckpointId>,
    /// Phase percentage after
    pub phase_progress: u8,
    /// Journey percentage after
    pub overall_progress: u8,
    /// Whether this write finished the journey
    pub journey_completed: bool,
}

/// Outcome of [`AutomationEngine::apply_event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReceipt {
    /// The idempotency key was already processed
    pub duplicate: bool,
    /// Transitions applied; empty for duplicates and no-ops
    pub transitions: Vec<AppliedTransition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    User,
    Automation,
}

enum Change {
    // `percentage: None` keeps the current value, capped below 100.
    Advance {
        status: CheckpointStatus,
        percentage: Option<u8>,
        metadata: Metadata,
    },
    Reset,
}

/// Checkpoint automation engine.
pub struct AutomationEngine {
    tracker: JourneyTracker,
    notifier: Notifier,
    rules: RuleTable,
    dedup: IdempotencyCache,
    journey_locks: KeyedLocks<(UserId, JourneyId)>,
    event_locks: KeyedLocks<(UserId, EventId)>,
    conflict_retries: u32,
}

impl AutomationEngine {
    /// Create an engine with the built-in rule table.
    pub fn new(tracker: JourneyTracker, notifier: Notifier, config: AutomationConfig) -> Self {
        Self {
            tracker,
            notifier,
            rules: RuleTable::builtin(),
            dedup: IdempotencyCache::new(config.dedup_capacity, config.dedup_ttl),
            journey_locks: KeyedLocks::new(),
            event_locks: KeyedLocks::new(),
            conflict_retries: config.conflict_retries,
        }
    }

    /// Replace the rule table.
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Rule table in use.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Journey reader.
    pub fn tracker(&self) -> &JourneyTracker {
        &self.tracker
    }

    /// Notifier deltas are published to.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Apply an external event for `user_id`.
    ///
    /// With an `event_id`, a redelivery of an already applied event for the
    /// same user is acknowledged without touching state or publishing.
    /// Failed events are not remembered, so the sender's retry is processed
    /// normally.
    pub async fn apply_event(
        &self,
        user_id: &UserId,
        event_id: Option<&EventId>,
        event: &AutomationEvent,
    ) -> Result<EventReceipt> {
        let rule = self.rules.resolve(event)?;

        let _event_guard = match event_id {
            Some(id) => Some(self.event_locks.lock(&(user_id.clone(), id.clone())).await),
            None => None,
        };
        if let Some(id) = event_id {
            if self.dedup.contains(user_id, id) {
                info!(
                    user_id = %user_id,
                    event_id = %id,
                    event_type = %event.kind(),
                    "duplicate event ignored"
                );
                return Ok(EventReceipt {
                    duplicate: true,
                    transitions: Vec::new(),
                });
            }
        }

        let change = Change::Advance {
            status: rule.status,
            percentage: Some(rule.completion_percentage),
            metadata: event.metadata(),
        };
        let applied = self
            .transition(
                user_id,
                &rule.journey_id,
                &rule.checkpoint_id,
                change,
                Source::Automation,
            )
            .await?;

        if let Some(id) = event_id {
            self.dedup.record(user_id.clone(), id.clone());
        }
        info!(
            user_id = %user_id,
            event_id = event_id.map(EventId::as_str).unwrap_or("-"),
            event_type = %event.kind(),
            checkpoint_id = %rule.checkpoint_id,
            applied = applied.is_some(),
            "automation event processed"
        );

        Ok(EventReceipt {
            duplicate: false,
            transitions: applied.into_iter().collect(),
        })
    }

    /// Move a checkpoint to `in-progress`.
    pub async fn start_checkpoint(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
    ) -> Result<Option<AppliedTransition>> {
        let change = Change::Advance {
            status: CheckpointStatus::InProgress,
            percentage: None,
            metadata: Metadata::new(),
        };
        self.transition(user_id, journey_id, checkpoint_id, change, Source::User)
            .await
    }

    /// Record partial progress (0..=99) on an in-progress checkpoint.
    pub async fn update_checkpoint_progress(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
        completion_percentage: u8,
    ) -> Result<Option<AppliedTransition>> {
        if completion_percentage > 99 {
            return Err(JourneyError::InvalidState(format!(
                "progress updates take 0..=99, got {}; complete the checkpoint instead",
                completion_percentage
            )));
        }
        let change = Change::Advance {
            status: CheckpointStatus::InProgress,
            percentage: Some(completion_percentage),
            metadata: Metadata::new(),
        };
        self.transition(user_id, journey_id, checkpoint_id, change, Source::User)
            .await
    }

    /// Move a checkpoint to `needs-review`.
    pub async fn submit_for_review(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
    ) -> Result<Option<AppliedTransition>> {
        let change = Change::Advance {
            status: CheckpointStatus::NeedsReview,
            percentage: None,
            metadata: Metadata::new(),
        };
        self.transition(user_id, journey_id, checkpoint_id, change, Source::User)
            .await
    }

    /// Complete a checkpoint.
    pub async fn complete_checkpoint(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
    ) -> Result<Option<AppliedTransition>> {
        let change = Change::Advance {
            status: CheckpointStatus::Completed,
            percentage: Some(100),
            metadata: Metadata::new(),
        };
        self.transition(user_id, journey_id, checkpoint_id, change, Source::User)
            .await
    }

    /// Return a checkpoint to `not-started`, clearing its metadata.
    ///
    /// Eligibility is kept, and checkpoints unlocked earlier stay unlocked.
    pub async fn reset_checkpoint(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
    ) -> Result<Option<AppliedTransition>> {
        self.transition(user_id, journey_id, checkpoint_id, Change::Reset, Source::User)
            .await
    }

    async fn transition(
        &self,
        user_id: &UserId,
        journey_id: &JourneyId,
        checkpoint_id: &CheckpointId,
        change: Change,
        source: Source,
    ) -> Result<Option<AppliedTransition>> {
        let template = self.tracker.catalog().get(journey_id)?;
        let location = template.locate(checkpoint_id).ok_or_else(|| {
            JourneyError::NotFound(format!(
                "checkpoint '{}' in journey '{}'",
                checkpoint_id, journey_id
            ))
        })?;
        let phase_index = location.phase_index;
        let phase_id = location.phase.id.clone();

        let _guard = self
            .journey_locks
            .lock(&(user_id.clone(), journey_id.clone()))
            .await;

        let before = self.tracker.snapshot(user_id, journey_id).await?;
        let key = CheckpointKey::new(user_id.clone(), journey_id.clone(), checkpoint_id.clone());

        let written = self
            .update_record(&key, template.default_state(phase_index), |current| {
                if source == Source::User && !current.eligible {
                    return Err(JourneyError::CheckpointLocked {
                        journey_id: journey_id.clone(),
                        checkpoint_id: checkpoint_id.clone(),
                    });
                }
                plan_change(checkpoint_id, current, &change)
            })
            .await;
        let (previous, written) = match written {
            Ok(pair) => pair,
            Err(e) => {
                warn!(key = %key, error = %e, "transition rejected");
                return Err(e);
            }
        };
        let stored = written.as_ref().unwrap_or(&previous);

        // Also runs when a completed checkpoint is re-applied, so a cascade
        // cut short by an earlier failure is finished on retry.
        let unlocked = if stored.is_completed() {
            self.cascade_unlock(user_id, template, phase_index).await?
        } else {
            Vec::new()
        };
        if written.is_none() && unlocked.is_empty() {
            debug!(key = %key, "transition is a no-op");
            return Ok(None);
        }

        let after = self.tracker.snapshot(user_id, journey_id).await?;
        let journey_completed = after.is_complete() && !before.is_complete();

        self.publish_deltas(
            user_id,
            &phase_id,
            checkpoint_id,
            written.as_ref(),
            &unlocked,
            &before,
            &after,
        );

        info!(
            user_id = %user_id,
            journey_id = %journey_id,
            checkpoint_id = %checkpoint_id,
            from = %previous.status,
            to = %stored.status,
            completion_percentage = stored.completion_percentage,
            unlocked = unlocked.len(),
            source = ?source,
            "checkpoint transition applied"
        );

        Ok(Some(AppliedTransition {
            journey_id: journey_id.clone(),
            phase_id: phase_id.clone(),
            checkpoint_id: checkpoint_id.clone(),
            from: previous.status,
            from_percentage: previous.completion_percentage,
            to: stored.status,
            to_percentage: stored.completion_percentage,
            unlocked: unlocked.into_iter().map(|(_, id, _)| id).collect(),
            phase_progress: after.phase(&phase_id).unwrap_or(0),
            overall_progress: after.overall_progress,
            journey_completed,
        }))
    }

    /// Make the next phase eligible once every checkpoint of
    /// `phase_index` is completed.
    async fn cascade_unlock(
        &self,
        user_id: &UserId,
        template: &JourneyTemplate,
        phase_index: usize,
    ) -> Result<Vec<(PhaseId, CheckpointId, CheckpointState)>> {
        let journey = self.tracker.load_journey(user_id, &template.id).await?;
        let phase_done = journey
            .phases
            .get(phase_index)
            .is_some_and(|phase| phase.is_complete());
        let Some(next_phase) = template.phases.get(phase_index + 1) else {
            return Ok(Vec::new());
        };
        if !phase_done {
            return Ok(Vec::new());
        }

        let mut unlocked = Vec::new();
        for checkpoint in &next_phase.checkpoints {
            let key = CheckpointKey::new(user_id.clone(), template.id.clone(), checkpoint.id.clone());
            let (_, written) = self
                .update_record(&key, template.default_state(phase_index + 1), |current| {
                    Ok((!current.eligible).then(|| CheckpointState {
                        eligible: true,
                        ..current.clone()
                    }))
                })
                .await?;
            if let Some(stored) = written {
                debug!(key = %key, "checkpoint unlocked");
                unlocked.push((next_phase.id.clone(), checkpoint.id.clone(), stored));
            }
        }
        Ok(unlocked)
    }

    /// Read, plan, and write one record with a revision check, retrying
    /// from a fresh read on conflict.
    ///
    /// `plan` returns `None` for a no-op. Returns the state read and, if
    /// anything was written, the stored state.
    async fn update_record<F>(
        &self,
        key: &CheckpointKey,
        default: CheckpointState,
        mut plan: F,
    ) -> Result<(CheckpointState, Option<CheckpointState>)>
    where
        F: FnMut(&CheckpointState) -> Result<Option<CheckpointState>> + Send,
    {
        let store = self.tracker.store();
        let mut attempt = 0;
        loop {
            let current = store
                .get_checkpoint_state(key)
                .await?
                .unwrap_or_else(|| default.clone());
            let Some(next) = plan(&current)? else {
                return Ok((current, None));
            };
            match store
                .set_checkpoint_state(key, next, Some(current.revision))
                .await
            {
                Ok(stored) => return Ok((current, Some(stored))),
                Err(StorageError::Conflict { .. }) if attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(key = %key, attempt, "revision conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_deltas(
        &self,
        user_id: &UserId,
        phase_id: &PhaseId,
        checkpoint_id: &CheckpointId,
        written: Option<&CheckpointState>,
        unlocked: &[(PhaseId, CheckpointId, CheckpointState)],
        before: &ProgressSnapshot,
        after: &ProgressSnapshot,
    ) {
        let journey_id = &after.journey_id;
        let mut deltas: Vec<ProgressDelta> = written
            .map(|stored| checkpoint_delta(journey_id, phase_id, checkpoint_id, stored))
            .into_iter()
            .collect();
        deltas.extend(
            unlocked
                .iter()
                .map(|(phase, checkpoint, state)| checkpoint_delta(journey_id, phase, checkpoint, state)),
        );
        deltas.extend(after.changed_phases(before).into_iter().map(|(phase, pct)| {
            ProgressDelta::PhaseUpdated(PhaseDelta {
                journey_id: journey_id.clone(),
                phase_id: phase,
                completion_percentage: pct,
                overall_progress: after.overall_progress,
            })
        }));
        if after.is_complete() && !before.is_complete() {
            deltas.push(ProgressDelta::JourneyCompleted(JourneyDelta {
                journey_id: journey_id.clone(),
                overall_progress: after.overall_progress,
            }));
        }

        for delta in deltas {
            self.notifier.publish(user_id, delta);
        }
    }
}

fn plan_change(
    checkpoint_id: &CheckpointId,
    current: &CheckpointState,
    change: &Change,
) -> Result<Option<CheckpointState>> {
    match change {
        Change::Advance {
            status,
            percentage,
            metadata,
        } => {
            let pct = percentage.unwrap_or(current.completion_percentage.min(99));
            match plan_transition(checkpoint_id, current, *status, pct)? {
                TransitionPlan::NoOp => Ok(None),
                TransitionPlan::Forward => {
                    let mut next = current.clone();
                    next.status = *status;
                    next.completion_percentage = pct;
                    for (k, v) in metadata {
                        next.metadata.insert(k.clone(), v.clone());
                    }
                    if next.is_completed() {
                        next.metadata.insert(
                            "completedAt".to_string(),
                            Value::from(Utc::now().to_rfc3339()),
                        );
                    }
                    Ok(Some(next))
                }
            }
        }
        Change::Reset => {
            let pristine = current.status == CheckpointStatus::NotStarted
                && current.completion_percentage == 0
                && current.metadata.is_empty();
            if pristine {
                return Ok(None);
            }
            Ok(Some(CheckpointState {
                status: CheckpointStatus::NotStarted,
                completion_percentage: 0,
                metadata: Metadata::new(),
                ..current.clone()
            }))
        }
    }
}

fn checkpoint_delta(
    journey_id: &JourneyId,
    phase_id: &PhaseId,
    checkpoint_id: &CheckpointId,
    state: &CheckpointState,
) -> ProgressDelta {
    ProgressDelta::CheckpointUpdated(CheckpointDelta {
        journey_id: journey_id.clone(),
        phase_id: phase_id.clone(),
        checkpoint_id: checkpoint_id.clone(),
        status: state.status,
        completion_percentage: state.completion_percentage,
        eligible: state.eligible,
        metadata: state.metadata.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use async_trait::async_trait;
    use journey_core::TemplateCatalog;
    use journey_realtime::Subscription;
    use journey_storage::{MemoryStore, ProgressStore};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Harness {
        engine: Arc<AutomationEngine>,
        store: Arc<MemoryStore>,
        notifier: Notifier,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        harness_with(store.clone(), store)
    }

    fn harness_with(store: Arc<dyn ProgressStore>, memory: Arc<MemoryStore>) -> Harness {
        let tracker = JourneyTracker::new(store, Arc::new(TemplateCatalog::builtin()));
        let notifier = Notifier::default();
        let engine = AutomationEngine::new(tracker, notifier.clone(), AutomationConfig::default());
        Harness {
            engine: Arc::new(engine),
            store: memory,
            notifier,
        }
    }

    fn ids(user: &str, journey: &str, checkpoint: &str) -> (UserId, JourneyId, CheckpointId) {
        (UserId::new(user), JourneyId::new(journey), CheckpointId::new(checkpoint))
    }

    fn event(kind: &str, payload: Value) -> AutomationEvent {
        AutomationEvent::parse(kind, payload).unwrap()
    }

    async fn complete(engine: &AutomationEngine, user: &str, journey: &str, checkpoint: &str) {
        let (u, j, c) = ids(user, journey, checkpoint);
        engine.complete_checkpoint(&u, &j, &c).await.unwrap();
    }

    /// Walk the job journey up to the placement phase.
    async fn reach_placement(engine: &AutomationEngine, user: &str) {
        for checkpoint in ["career-mapping", "soft-hard-skills", "enroll-learn", "resume-linkedin"] {
            complete(engine, user, "job-magician", checkpoint).await;
        }
    }

    async fn drain(sub: &mut Subscription) -> Vec<ProgressDelta> {
        let mut out = Vec::new();
        while let Ok(Some(delta)) =
            tokio::time::timeout(Duration::from_millis(20), sub.recv()).await
        {
            out.push(delta);
        }
        out
    }

    fn kinds(deltas: &[ProgressDelta]) -> Vec<&'static str> {
        deltas.iter().map(ProgressDelta::kind).collect()
    }

    #[tokio::test]
    async fn test_registration_completes_and_bank_unlocks_next_phase() {
        let h = harness();
        complete(&h.engine, "u1", "business-magician", "business-vision").await;

        let user = UserId::new("u1");
        let mut sub = h.notifier.subscribe(&user);

        let receipt = h
            .engine
            .apply_event(
                &user,
                None,
                &event("registration-completed", json!({"ein": "12-3456789"})),
            )
            .await
            .unwrap();
        let applied = &receipt.transitions[0];
        assert_eq!(applied.from, CheckpointStatus::NotStarted);
        assert_eq!(applied.to, CheckpointStatus::Completed);
        assert_eq!(applied.to_percentage, 100);
        assert!(applied.unlocked.is_empty());

        let key = CheckpointKey::new("u1", "business-magician", "structure-legal");
        let stored = h.store.get_checkpoint_state(&key).await.unwrap().unwrap();
        assert_eq!(stored.metadata["automatedBy"], "northwest-agent-api");
        assert_eq!(stored.metadata["ein"], "12-3456789");
        assert!(stored.metadata.contains_key("completedAt"));
        assert_eq!(kinds(&drain(&mut sub).await), ["checkpoint_updated", "phase_updated"]);

        let receipt = h
            .engine
            .apply_event(&user, None, &event("bank-account-opened", json!({})))
            .await
            .unwrap();
        let applied = &receipt.transitions[0];
        assert_eq!(
            applied.unlocked,
            vec![CheckpointId::new("market-ops"), CheckpointId::new("funding-strategy")]
        );
        assert_eq!(applied.phase_progress, 100);
        assert_eq!(applied.overall_progress, 50);

        let deltas = drain(&mut sub).await;
        assert_eq!(
            kinds(&deltas),
            ["checkpoint_updated", "checkpoint_updated", "checkpoint_updated", "phase_updated"]
        );
        match &deltas[1] {
            ProgressDelta::CheckpointUpdated(d) => {
                assert_eq!(d.checkpoint_id.as_str(), "market-ops");
                assert!(d.eligible);
                assert_eq!(d.status, CheckpointStatus::NotStarted);
            }
            other => panic!("unexpected delta {:?}", other),
        }
        match &deltas[3] {
            ProgressDelta::PhaseUpdated(d) => {
                assert_eq!(d.phase_id.as_str(), "build");
                assert_eq!(d.completion_percentage, 100);
                assert_eq!(d.overall_progress, 50);
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_write_through_locked_checkpoints() {
        let h = harness();
        let user = UserId::new("u1");

        let receipt = h
            .engine
            .apply_event(&user, None, &event("registration-completed", json!({})))
            .await
            .unwrap();
        let applied = &receipt.transitions[0];
        assert_eq!(applied.from, CheckpointStatus::NotStarted);
        assert_eq!(applied.to, CheckpointStatus::Completed);
        assert_eq!(applied.to_percentage, 100);

        let receipt = h
            .engine
            .apply_event(&user, None, &event("bank-account-opened", json!({})))
            .await
            .unwrap();
        assert_eq!(
            receipt.transitions[0].unlocked,
            vec![CheckpointId::new("market-ops"), CheckpointId::new("funding-strategy")]
        );

        let receipt = h
            .engine
            .apply_event(&user, None, &event("application-submitted", json!({})))
            .await
            .unwrap();
        assert_eq!(receipt.transitions[0].to, CheckpointStatus::InProgress);
        assert_eq!(receipt.transitions[0].to_percentage, 50);

        // The lock itself is untouched; only user actions honor it.
        let journey = h
            .engine
            .tracker()
            .load_journey(&user, &JourneyId::new("business-magician"))
            .await
            .unwrap();
        assert!(!journey.phases[1].checkpoints[0].eligible);
        assert_eq!(journey.phases[1].completion_percentage(), 100);
    }

    #[tokio::test]
    async fn test_locked_manual_actions_have_no_side_effects() {
        let h = harness();
        let user = UserId::new("u1");
        let mut sub = h.notifier.subscribe(&user);
        let (u, j, c) = ids("u1", "business-magician", "market-ops");

        let err = h.engine.complete_checkpoint(&u, &j, &c).await.unwrap_err();
        assert!(matches!(err, JourneyError::CheckpointLocked { .. }));
        let err = h.engine.start_checkpoint(&u, &j, &c).await.unwrap_err();
        assert!(matches!(err, JourneyError::CheckpointLocked { .. }));
        let err = h.engine.update_checkpoint_progress(&u, &j, &c, 10).await.unwrap_err();
        assert!(matches!(err, JourneyError::CheckpointLocked { .. }));
        let err = h.engine.submit_for_review(&u, &j, &c).await.unwrap_err();
        assert!(matches!(err, JourneyError::CheckpointLocked { .. }));

        assert!(h.store.is_empty().await);
        assert!(drain(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_event_ids_are_scoped_per_user() {
        let h = harness();
        let id = EventId::new("evt-1");
        let submitted = event("application-submitted", json!({}));

        let alice = h
            .engine
            .apply_event(&UserId::new("alice"), Some(&id), &submitted)
            .await
            .unwrap();
        let bob = h
            .engine
            .apply_event(&UserId::new("bob"), Some(&id), &submitted)
            .await
            .unwrap();
        assert!(!alice.duplicate);
        assert!(!bob.duplicate);
        assert_eq!(bob.transitions.len(), 1);

        let again = h
            .engine
            .apply_event(&UserId::new("bob"), Some(&id), &submitted)
            .await
            .unwrap();
        assert!(again.duplicate);
    }

    #[tokio::test]
    async fn test_journey_completes_on_last_checkpoint_not_at_rounded_hundred() {
        let h = harness();
        reach_placement(&h.engine, "u1").await;
        let user = UserId::new("u1");
        let (u, j, c) = ids("u1", "job-magician", "job-app-followup");
        let mut sub = h.notifier.subscribe(&user);

        h.engine.start_checkpoint(&u, &j, &c).await.unwrap();
        let almost = h
            .engine
            .update_checkpoint_progress(&u, &j, &c, 99)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(almost.overall_progress, 100);
        assert!(!almost.journey_completed);
        assert!(!kinds(&drain(&mut sub).await).contains(&"journey_completed"));

        let done = h.engine.complete_checkpoint(&u, &j, &c).await.unwrap().unwrap();
        assert!(done.journey_completed);
        assert_eq!(
            kinds(&drain(&mut sub).await),
            ["checkpoint_updated", "phase_updated", "journey_completed"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_event_applies_once() {
        let h = harness();
        reach_placement(&h.engine, "u1").await;

        let user = UserId::new("u1");
        let mut sub = h.notifier.subscribe(&user);
        let id = EventId::new("evt-42");
        let submitted = event("application-submitted", json!({"applicationsSubmitted": 3}));

        let first = h.engine.apply_event(&user, Some(&id), &submitted).await.unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.transitions.len(), 1);
        let key = CheckpointKey::new("u1", "job-magician", "job-app-followup");
        let after_first = h.store.get_checkpoint_state(&key).await.unwrap().unwrap();

        let second = h.engine.apply_event(&user, Some(&id), &submitted).await.unwrap();
        assert!(second.duplicate);
        assert!(second.transitions.is_empty());
        let after_second = h.store.get_checkpoint_state(&key).await.unwrap().unwrap();
        assert_eq!(after_first, after_second);

        let deltas = drain(&mut sub).await;
        assert_eq!(kinds(&deltas), ["checkpoint_updated", "phase_updated"]);
        match &deltas[1] {
            ProgressDelta::PhaseUpdated(d) => {
                assert_eq!(d.completion_percentage, 50);
                // (4 * 100 + 50) / 5
                assert_eq!(d.overall_progress, 90);
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_state_without_key_is_noop() {
        let h = harness();
        reach_placement(&h.engine, "u1").await;
        let user = UserId::new("u1");
        let submitted = event("application-submitted", json!({}));

        h.engine.apply_event(&user, None, &submitted).await.unwrap();
        let mut sub = h.notifier.subscribe(&user);
        let again = h.engine.apply_event(&user, None, &submitted).await.unwrap();
        assert!(!again.duplicate);
        assert!(again.transitions.is_empty());
        assert!(drain(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_offer_completes_journey_and_blocks_regression() {
        let h = harness();
        reach_placement(&h.engine, "u1").await;
        let user = UserId::new("u1");
        let mut sub = h.notifier.subscribe(&user);

        let receipt = h
            .engine
            .apply_event(&user, None, &event("offer-received", json!({"company": "Acme"})))
            .await
            .unwrap();
        assert!(receipt.transitions[0].journey_completed);
        let deltas = drain(&mut sub).await;
        assert_eq!(
            kinds(&deltas),
            ["checkpoint_updated", "phase_updated", "journey_completed"]
        );

        let err = h
            .engine
            .apply_event(&user, None, &event("interview-scheduled", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::InvalidStateTransition { .. }));

        let again = h
            .engine
            .apply_event(&user, None, &event("offer-received", json!({})))
            .await
            .unwrap();
        assert!(again.transitions.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_event_does_not_mutate() {
        let h = harness();
        let engine = AutomationEngine::new(
            h.engine.tracker().clone(),
            h.notifier.clone(),
            AutomationConfig::default(),
        )
        .with_rules(RuleTable::empty());

        let offer = AutomationEvent::new(EventKind::OfferReceived, Metadata::new()).unwrap();
        let err = engine
            .apply_event(&UserId::new("u1"), Some(&EventId::new("e")), &offer)
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::UnrecognizedEvent(_)));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_generic_update_targets_payload_checkpoint() {
        let h = harness();
        let user = UserId::new("u1");
        let receipt = h
            .engine
            .apply_event(
                &user,
                None,
                &event(
                    "generic-checkpoint-update",
                    json!({
                        "journeyId": "vr4deaf",
                        "checkpointId": "eligibility-determination",
                        "status": "in-progress",
                        "completionPercentage": 40
                    }),
                ),
            )
            .await
            .unwrap();
        assert_eq!(receipt.transitions[0].to_percentage, 40);
        // (40 + 0) / 2 = 20 for the phase, 20 / 5 = 4 overall
        assert_eq!(receipt.transitions[0].phase_progress, 20);
        assert_eq!(receipt.transitions[0].overall_progress, 4);

        let err = h
            .engine
            .apply_event(
                &user,
                None,
                &event(
                    "generic-checkpoint-update",
                    json!({
                        "journeyId": "vr4deaf",
                        "checkpointId": "no-such-step",
                        "status": "completed",
                        "completionPercentage": 100
                    }),
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JourneyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_manual_actions_follow_state_machine() {
        let h = harness();
        let (u, j, c) = ids("u1", "business-magician", "business-vision");
        let engine = &h.engine;

        let started = engine.start_checkpoint(&u, &j, &c).await.unwrap().unwrap();
        assert_eq!(started.to, CheckpointStatus::InProgress);
        assert_eq!(started.to_percentage, 0);
        assert!(engine.start_checkpoint(&u, &j, &c).await.unwrap().is_none());

        engine.update_checkpoint_progress(&u, &j, &c, 40).await.unwrap();
        let err = engine.update_checkpoint_progress(&u, &j, &c, 30).await.unwrap_err();
        assert!(matches!(err, JourneyError::InvalidStateTransition { .. }));
        let err = engine.update_checkpoint_progress(&u, &j, &c, 100).await.unwrap_err();
        assert!(matches!(err, JourneyError::InvalidState(_)));

        let reviewed = engine.submit_for_review(&u, &j, &c).await.unwrap().unwrap();
        assert_eq!(reviewed.to, CheckpointStatus::NeedsReview);
        assert_eq!(reviewed.to_percentage, 40);

        let done = engine.complete_checkpoint(&u, &j, &c).await.unwrap().unwrap();
        assert_eq!(done.to_percentage, 100);
        assert_eq!(done.unlocked.len(), 2);

        let reset = engine.reset_checkpoint(&u, &j, &c).await.unwrap().unwrap();
        assert_eq!(reset.to, CheckpointStatus::NotStarted);
        assert!(engine.reset_checkpoint(&u, &j, &c).await.unwrap().is_none());

        let journey = engine.tracker().load_journey(&u, &j).await.unwrap();
        let vision = &journey.phases[0].checkpoints[0];
        assert!(vision.eligible);
        assert!(vision.metadata.is_empty());
        // Build stays unlocked after the reset.
        assert!(journey.phases[1].checkpoints.iter().all(|c| c.eligible));
        for phase in &journey.phases {
            for checkpoint in &phase.checkpoints {
                journey_core::validate_pair(checkpoint.status, checkpoint.completion_percentage)
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_sibling_completions_still_unlock() {
        let h = harness();
        complete(&h.engine, "u1", "business-magician", "business-vision").await;

        let mut handles = Vec::new();
        for kind in ["registration-completed", "bank-account-opened"] {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .apply_event(&UserId::new("u1"), None, &event(kind, json!({})))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let journey = h
            .engine
            .tracker()
            .load_journey(&UserId::new("u1"), &JourneyId::new("business-magician"))
            .await
            .unwrap();
        assert!(journey.phases[2].checkpoints.iter().all(|c| c.eligible));
        assert!(journey.phases[3].checkpoints.iter().all(|c| !c.eligible));
    }

    /// Store whose writes fail, conflict a set number of times first, or
    /// fail once for one checkpoint.
    struct FaultyStore {
        inner: Arc<MemoryStore>,
        conflicts_left: AtomicUsize,
        always_fail: bool,
        fail_once_on: Mutex<Option<CheckpointId>>,
    }

    #[async_trait]
    impl ProgressStore for FaultyStore {
        async fn get_checkpoint_state(
            &self,
            key: &CheckpointKey,
        ) -> journey_storage::Result<Option<CheckpointState>> {
            self.inner.get_checkpoint_state(key).await
        }

        async fn set_checkpoint_state(
            &self,
            key: &CheckpointKey,
            state: CheckpointState,
            expected_revision: Option<u64>,
        ) -> journey_storage::Result<CheckpointState> {
            if self.always_fail {
                return Err(StorageError::Backend("disk on fire".to_string()));
            }
            {
                let mut fail_once = self.fail_once_on.lock().unwrap();
                if fail_once.as_ref() == Some(&key.checkpoint_id) {
                    fail_once.take();
                    return Err(StorageError::Backend("transient".to_string()));
                }
            }
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Conflict {
                    key: key.clone(),
                    expected: expected_revision.unwrap_or(0),
                    actual: expected_revision.unwrap_or(0) + 1,
                });
            }
            self.inner.set_checkpoint_state(key, state, expected_revision).await
        }

        async fn list_checkpoint_states(
            &self,
            user_id: &UserId,
            journey_id: &JourneyId,
        ) -> journey_storage::Result<HashMap<CheckpointId, CheckpointState>> {
            self.inner.list_checkpoint_states(user_id, journey_id).await
        }
    }

    fn faulty(conflicts: usize, always_fail: bool) -> Harness {
        faulty_store(FaultyStore {
            inner: Arc::new(MemoryStore::new()),
            conflicts_left: AtomicUsize::new(conflicts),
            always_fail,
            fail_once_on: Mutex::new(None),
        })
    }

    fn faulty_store(store: FaultyStore) -> Harness {
        let memory = store.inner.clone();
        harness_with(Arc::new(store), memory)
    }

    #[tokio::test]
    async fn test_persistence_error_surfaces_and_is_not_remembered() {
        let h = faulty(0, true);
        let user = UserId::new("u1");
        let mut sub = h.notifier.subscribe(&user);
        let id = EventId::new("evt-9");
        let update = event(
            "generic-checkpoint-update",
            json!({
                "journeyId": "job-magician",
                "checkpointId": "career-mapping",
                "status": "completed",
                "completionPercentage": 100
            }),
        );

        let err = h.engine.apply_event(&user, Some(&id), &update).await.unwrap_err();
        assert!(matches!(err, JourneyError::PersistenceError(_)));
        assert!(h.engine.dedup.is_empty());
        assert!(drain(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_conflict_is_retried() {
        let h = faulty(1, false);
        let (u, j, c) = ids("u1", "job-magician", "career-mapping");
        let applied = h.engine.start_checkpoint(&u, &j, &c).await.unwrap();
        assert!(applied.is_some());

        let h = faulty(2, false);
        let err = h.engine.start_checkpoint(&u, &j, &c).await.unwrap_err();
        assert!(matches!(err, JourneyError::Conflict(_)));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_finishes_interrupted_unlock() {
        let h = faulty_store(FaultyStore {
            inner: Arc::new(MemoryStore::new()),
            conflicts_left: AtomicUsize::new(0),
            always_fail: false,
            fail_once_on: Mutex::new(Some(CheckpointId::new("structure-legal"))),
        });
        let user = UserId::new("u1");
        let id = EventId::new("evt-7");
        let vision_done = event(
            "generic-checkpoint-update",
            json!({
                "journeyId": "business-magician",
                "checkpointId": "business-vision",
                "status": "completed",
                "completionPercentage": 100
            }),
        );

        // The target write lands, the unlock of the next phase does not.
        let err = h.engine.apply_event(&user, Some(&id), &vision_done).await.unwrap_err();
        assert!(matches!(err, JourneyError::PersistenceError(_)));
        let journey_id = JourneyId::new("business-magician");
        let journey = h.engine.tracker().load_journey(&user, &journey_id).await.unwrap();
        assert!(journey.phases[0].is_complete());
        assert!(journey.phases[1].checkpoints.iter().all(|c| !c.eligible));

        let mut sub = h.notifier.subscribe(&user);
        let retry = h.engine.apply_event(&user, Some(&id), &vision_done).await.unwrap();
        assert!(!retry.duplicate);
        let applied = &retry.transitions[0];
        assert_eq!(applied.from, CheckpointStatus::Completed);
        assert_eq!(
            applied.unlocked,
            vec![CheckpointId::new("structure-legal"), CheckpointId::new("financial-setup")]
        );
        assert_eq!(kinds(&drain(&mut sub).await), ["checkpoint_updated", "checkpoint_updated"]);

        let journey = h.engine.tracker().load_journey(&user, &journey_id).await.unwrap();
        assert!(journey.phases[1].checkpoints.iter().all(|c| c.eligible));

        // Settled: a third delivery is a duplicate.
        let third = h.engine.apply_event(&user, Some(&id), &vision_done).await.unwrap();
        assert!(third.duplicate);
    }
}
