//! HTTP handlers.

pub mod health;
pub mod journeys;
pub mod realtime;
pub mod webhooks;
