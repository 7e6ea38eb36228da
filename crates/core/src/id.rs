//! Identifiers for journey entities.
//!
//! Journey, phase and checkpoint ids come from templates and are
//! human-readable slugs. User ids and event ids are opaque strings handed
//! to us by callers. Subscription ids are generated locally.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of the user a journey instance belongs to.
    UserId
);

string_id!(
    /// Identifier of a journey template (e.g. `business-magician`).
    JourneyId
);

string_id!(
    /// Identifier of a phase, unique within its journey.
    PhaseId
);

string_id!(
    /// Identifier of a checkpoint, unique within its journey.
    CheckpointId
);

string_id!(
    /// Caller-supplied idempotency key for an automation event.
    EventId
);

/// Identifier of a live realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Ulid);

impl SubscriptionId {
    /// Generate a new SubscriptionId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Storage key of one checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// Owner
    pub user_id: UserId,
    /// Journey template the checkpoint belongs to
    pub journey_id: JourneyId,
    /// Checkpoint within the journey
    pub checkpoint_id: CheckpointId,
}

impl CheckpointKey {
    /// Build a key from its parts.
    pub fn new(
        user_id: impl Into<UserId>,
        journey_id: impl Into<JourneyId>,
        checkpoint_id: impl Into<CheckpointId>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            journey_id: journey_id.into(),
            checkpoint_id: checkpoint_id.into(),
        }
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.journey_id, self.checkpoint_id)
    }
}
