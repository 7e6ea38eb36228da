//! Realtime Notifier
//!
//! Pushes progress deltas to live per-user subscriptions. The notifier
//! is a notification channel only: subscribers that reconnect re-read
//! the journey before resuming.

#![warn(missing_docs)]

pub mod notifier;

pub use notifier::{Notifier, NotifierConfig, Subscription};
