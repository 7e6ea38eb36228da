//! External automation events.

use std::fmt;
use std::str::FromStr;

use journey_core::{CheckpointId, CheckpointStatus, JourneyError, JourneyId, Metadata, Result};
use serde_json::Value;

/// Known external triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Business registration finished (Northwest agent)
    RegistrationCompleted,
    /// Business bank account opened (banking partner)
    BankAccountOpened,
    /// Job application submitted (job board)
    ApplicationSubmitted,
    /// Interview scheduled (job board)
    InterviewScheduled,
    /// Job offer received (job board)
    OfferReceived,
    /// Explicit target carried in the payload
    GenericCheckpointUpdate,
}

impl EventKind {
    /// All kinds, in table order.
    pub const ALL: [EventKind; 6] = [
        EventKind::RegistrationCompleted,
        EventKind::BankAccountOpened,
        EventKind::ApplicationSubmitted,
        EventKind::InterviewScheduled,
        EventKind::OfferReceived,
        EventKind::GenericCheckpointUpdate,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RegistrationCompleted => "registration-completed",
            EventKind::BankAccountOpened => "bank-account-opened",
            EventKind::ApplicationSubmitted => "application-submitted",
            EventKind::InterviewScheduled => "interview-scheduled",
            EventKind::OfferReceived => "offer-received",
            EventKind::GenericCheckpointUpdate => "generic-checkpoint-update",
        }
    }

    /// Source system recorded as `automatedBy`.
    pub fn source(self) -> &'static str {
        match self {
            EventKind::RegistrationCompleted => "northwest-agent-api",
            EventKind::BankAccountOpened => "banking-partner-api",
            EventKind::ApplicationSubmitted
            | EventKind::InterviewScheduled
            | EventKind::OfferReceived => "job-board-api",
            EventKind::GenericCheckpointUpdate => "webhook",
        }
    }

    /// Payload fields copied into checkpoint metadata.
    fn metadata_fields(self) -> &'static [&'static str] {
        match self {
            EventKind::RegistrationCompleted => &["ein", "businessName", "registrationDate"],
            EventKind::BankAccountOpened => &["maskedAccountNumber", "routingNumber", "accountType"],
            EventKind::ApplicationSubmitted => &["applicationsSubmitted", "lastApplicationDate"],
            EventKind::InterviewScheduled => &["interviewsScheduled", "nextInterviewDate"],
            EventKind::OfferReceived => &["company", "position", "salary", "startDate"],
            EventKind::GenericCheckpointUpdate => &[],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JourneyError::UnrecognizedEvent(format!("unknown event type '{}'", s)))
    }
}

/// Explicit target of a `generic-checkpoint-update` event.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericUpdate {
    /// Journey template
    pub journey_id: JourneyId,
    /// Checkpoint within the journey
    pub checkpoint_id: CheckpointId,
    /// Requested status
    pub status: CheckpointStatus,
    /// Requested percentage
    pub completion_percentage: u8,
}

/// A parsed automation event.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationEvent {
    kind: EventKind,
    payload: Metadata,
    target: Option<GenericUpdate>,
}

impl AutomationEvent {
    /// Parse the generic webhook contract `{eventType, payload}`.
    ///
    /// Unknown event types and malformed payloads fail with
    /// `UnrecognizedEvent`.
    pub fn parse(event_type: &str, payload: Value) -> Result<Self> {
        let kind: EventKind = event_type.parse()?;
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Metadata::new(),
            other => {
                return Err(JourneyError::UnrecognizedEvent(format!(
                    "payload for '{}' must be an object, got {}",
                    kind, other
                )))
            }
        };
        Self::new(kind, payload)
    }

    /// Build an event from an already decoded payload.
    pub fn new(kind: EventKind, payload: Metadata) -> Result<Self> {
        let target = match kind {
            EventKind::GenericCheckpointUpdate => Some(parse_generic(&payload)?),
            _ => None,
        };
        Ok(Self {
            kind,
            payload,
            target,
        })
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Raw payload.
    pub fn payload(&self) -> &Metadata {
        &self.payload
    }

    /// Payload-supplied target, for generic updates.
    pub fn target(&self) -> Option<&GenericUpdate> {
        self.target.as_ref()
    }

    /// Metadata this event contributes to the checkpoint.
    ///
    /// Always includes `automatedBy`. Raw account numbers never make it
    /// into metadata; only their masked form does.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("automatedBy".to_string(), Value::from(self.kind.source()));

        for field in self.kind.metadata_fields() {
            if let Some(value) = self.payload.get(*field) {
                metadata.insert((*field).to_string(), value.clone());
            }
        }

        match self.kind {
            EventKind::BankAccountOpened if !metadata.contains_key("maskedAccountNumber") => {
                if let Some(raw) = self.payload.get("accountNumber").and_then(Value::as_str) {
                    metadata.insert(
                        "maskedAccountNumber".to_string(),
                        Value::from(mask_account_number(raw)),
                    );
                }
            }
            EventKind::GenericCheckpointUpdate => {
                if let Some(Value::Object(extra)) = self.payload.get("metadata") {
                    for (k, v) in extra {
                        metadata.insert(k.clone(), v.clone());
                    }
                }
            }
            _ => {}
        }

        metadata
    }
}

fn parse_generic(payload: &Metadata) -> Result<GenericUpdate> {
    let field = |name: &str| {
        payload.get(name).ok_or_else(|| {
            JourneyError::UnrecognizedEvent(format!(
                "generic-checkpoint-update requires '{}'",
                name
            ))
        })
    };
    let string = |name: &str| -> Result<String> {
        field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| JourneyError::UnrecognizedEvent(format!("'{}' must be a string", name)))
    };

    let status: CheckpointStatus = string("status")?
        .parse()
        .map_err(|e: JourneyError| JourneyError::UnrecognizedEvent(e.to_string()))?;
    let completion_percentage = field("completionPercentage")?
        .as_u64()
        .filter(|p| *p <= 100)
        .ok_or_else(|| {
            JourneyError::UnrecognizedEvent(
                "'completionPercentage' must be an integer in 0..=100".to_string(),
            )
        })? as u8;

    Ok(GenericUpdate {
        journey_id: JourneyId::new(string("journeyId")?),
        checkpoint_id: CheckpointId::new(string("checkpointId")?),
        status,
        completion_percentage,
    })
}

/// Keep only the last four characters of an account number.
pub fn mask_account_number(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("****{}", tail)
}

// Source-shaped webhook bodies.

/// `business-registration` webhook: only `status == "completed"` is an event.
pub fn from_business_registration(status: &str, business_data: &Value) -> Result<Option<AutomationEvent>> {
    if status != "completed" {
        return Ok(None);
    }
    let mut payload = Metadata::new();
    copy_field(business_data, "ein", &mut payload, "ein");
    copy_field(business_data, "name", &mut payload, "businessName");
    copy_field(business_data, "businessName", &mut payload, "businessName");
    copy_field(business_data, "registrationDate", &mut payload, "registrationDate");
    AutomationEvent::new(EventKind::RegistrationCompleted, payload).map(Some)
}

/// `bank-account` webhook: only `status == "account_opened"` is an event.
pub fn from_bank_account(status: &str, account_data: &Value) -> Result<Option<AutomationEvent>> {
    if status != "account_opened" {
        return Ok(None);
    }
    let mut payload = Metadata::new();
    copy_field(account_data, "maskedAccountNumber", &mut payload, "maskedAccountNumber");
    copy_field(account_data, "accountNumber", &mut payload, "accountNumber");
    copy_field(account_data, "routingNumber", &mut payload, "routingNumber");
    copy_field(account_data, "type", &mut payload, "accountType");
    copy_field(account_data, "accountType", &mut payload, "accountType");
    AutomationEvent::new(EventKind::BankAccountOpened, payload).map(Some)
}

/// `job-application` webhook; unknown `eventType` values are rejected.
pub fn from_job_application(event_type: &str, application_data: &Value) -> Result<AutomationEvent> {
    let mut payload = Metadata::new();
    let kind = match event_type {
        "application_submitted" => {
            copy_field(application_data, "totalApplications", &mut payload, "applicationsSubmitted");
            copy_field(application_data, "submittedAt", &mut payload, "lastApplicationDate");
            EventKind::ApplicationSubmitted
        }
        "interview_scheduled" => {
            copy_field(application_data, "interviewCount", &mut payload, "interviewsScheduled");
            copy_field(application_data, "interviewDate", &mut payload, "nextInterviewDate");
            EventKind::InterviewScheduled
        }
        "job_offer_received" => {
            for field in ["company", "position", "salary", "startDate"] {
                copy_field(application_data, field, &mut payload, field);
            }
            EventKind::OfferReceived
        }
        other => {
            return Err(JourneyError::UnrecognizedEvent(format!(
                "unknown job application event '{}'",
                other
            )))
        }
    };
    AutomationEvent::new(kind, payload)
}

fn copy_field(source: &Value, from: &str, payload: &mut Metadata, to: &str) {
    if let Some(value) = source.get(from).filter(|v| !v.is_null()) {
        payload.insert(to.to_string(), value.clone());
    }
}
