//! Checkpoint Automation Engine
//!
//! Maps external events onto checkpoint transitions through a rule table,
//! deduplicates redelivered events, cascades phase unlocks and publishes
//! progress deltas.

#![warn(missing_docs)]

pub mod dedup;
pub mod engine;
pub mod event;
pub mod rules;

pub use dedup::IdempotencyCache;
pub use engine::{AppliedTransition, AutomationConfig, AutomationEngine, EventReceipt};
pub use event::{
    from_bank_account, from_business_registration, from_job_application, mask_account_number,
    AutomationEvent, EventKind, GenericUpdate,
};
pub use rules::{Rule, RuleTable};
