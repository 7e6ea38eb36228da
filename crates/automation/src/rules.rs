//! Table-driven mapping from events to checkpoint transitions.

use std::collections::HashMap;

use journey_core::{
    validate_pair, CheckpointId, CheckpointStatus, JourneyError, JourneyId, Result,
};

use crate::event::{AutomationEvent, EventKind};

/// Where an event lands and what it sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Journey template
    pub journey_id: JourneyId,
    /// Target checkpoint
    pub checkpoint_id: CheckpointId,
    /// Resulting status
    pub status: CheckpointStatus,
    /// Resulting percentage
    pub completion_percentage: u8,
}

impl Rule {
    /// Create a rule.
    pub fn new(
        journey_id: impl Into<JourneyId>,
        checkpoint_id: impl Into<CheckpointId>,
        status: CheckpointStatus,
        completion_percentage: u8,
    ) -> Self {
        Self {
            journey_id: journey_id.into(),
            checkpoint_id: checkpoint_id.into(),
            status,
            completion_percentage,
        }
    }
}

/// Event kind to rule table.
///
/// `generic-checkpoint-update` never has an entry; its target comes from
/// the event payload.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: HashMap<EventKind, Rule>,
}

impl RuleTable {
    /// Empty table: every non-generic event is unrecognized.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in rules for the shipped journeys.
    pub fn builtin() -> Self {
        use CheckpointStatus::{Completed, InProgress};

        let mut rules = HashMap::new();
        rules.insert(
            EventKind::RegistrationCompleted,
            Rule::new("business-magician", "structure-legal", Completed, 100),
        );
        rules.insert(
            EventKind::BankAccountOpened,
            Rule::new("business-magician", "financial-setup", Completed, 100),
        );
        rules.insert(
            EventKind::ApplicationSubmitted,
            Rule::new("job-magician", "job-app-followup", InProgress, 50),
        );
        rules.insert(
            EventKind::InterviewScheduled,
            Rule::new("job-magician", "job-app-followup", InProgress, 75),
        );
        rules.insert(
            EventKind::OfferReceived,
            Rule::new("job-magician", "job-app-followup", Completed, 100),
        );
        Self { rules }
    }

    /// Add or replace the rule for `kind`.
    pub fn insert(&mut self, kind: EventKind, rule: Rule) -> Result<()> {
        if kind == EventKind::GenericCheckpointUpdate {
            return Err(JourneyError::InvalidTemplate(
                "generic-checkpoint-update takes its target from the payload".to_string(),
            ));
        }
        validate_pair(rule.status, rule.completion_percentage)?;
        self.rules.insert(kind, rule);
        Ok(())
    }

    /// Rule for `kind`, if any.
    pub fn get(&self, kind: EventKind) -> Option<&Rule> {
        self.rules.get(&kind)
    }

    /// Target of `event`.
    pub fn resolve(&self, event: &AutomationEvent) -> Result<Rule> {
        if let Some(target) = event.target() {
            return Ok(Rule {
                journey_id: target.journey_id.clone(),
                checkpoint_id: target.checkpoint_id.clone(),
                status: target.status,
                completion_percentage: target.completion_percentage,
            });
        }
        self.get(event.kind()).cloned().ok_or_else(|| {
            JourneyError::UnrecognizedEvent(format!("no rule for event '{}'", event.kind()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::Metadata;
    use serde_json::json;

    #[test]
    fn test_builtin_rules_are_valid() {
        let table = RuleTable::builtin();
        for kind in EventKind::ALL {
            match table.get(kind) {
                Some(rule) => validate_pair(rule.status, rule.completion_percentage).unwrap(),
                None => assert_eq!(kind, EventKind::GenericCheckpointUpdate),
            }
        }
    }

    #[test]
    fn test_resolve_uses_table() {
        let table = RuleTable::builtin();
        let event = AutomationEvent::new(EventKind::InterviewScheduled, Metadata::new()).unwrap();
        let rule = table.resolve(&event).unwrap();
        assert_eq!(rule.checkpoint_id.as_str(), "job-app-followup");
        assert_eq!(rule.completion_percentage, 75);
    }

    #[test]
    fn test_resolve_generic_from_payload() {
        let event = AutomationEvent::parse(
            "generic-checkpoint-update",
            json!({
                "journeyId": "vr4deaf",
                "checkpointId": "case-closure",
                "status": "completed",
                "completionPercentage": 100
            }),
        )
        .unwrap();
        let rule = RuleTable::empty().resolve(&event).unwrap();
        assert_eq!(rule, Rule::new("vr4deaf", "case-closure", CheckpointStatus::Completed, 100));
    }

    #[test]
    fn test_missing_rule_is_unrecognized() {
        let event = AutomationEvent::new(EventKind::OfferReceived, Metadata::new()).unwrap();
        let err = RuleTable::empty().resolve(&event).unwrap_err();
        assert!(matches!(err, JourneyError::UnrecognizedEvent(_)));
    }

    #[test]
    fn test_insert_rejects_broken_rules() {
        let mut table = RuleTable::empty();
        let err = table
            .insert(
                EventKind::OfferReceived,
                Rule::new("job-magician", "job-app-followup", CheckpointStatus::Completed, 90),
            )
            .unwrap_err();
        assert!(matches!(err, JourneyError::InvalidState(_)));

        let err = table
            .insert(
                EventKind::GenericCheckpointUpdate,
                Rule::new("job-magician", "job-app-followup", CheckpointStatus::Completed, 100),
            )
            .unwrap_err();
        assert!(matches!(err, JourneyError::InvalidTemplate(_)));
    }
}
