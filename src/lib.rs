//! chainrelay: relays smart-contract events to HTTP webhooks with
//! filtering, platform-specific payload formatting, and durable retrying
//! delivery.

pub mod chain;
pub mod config;
pub mod constants;
pub mod database;
pub mod delivery;
pub mod events;
pub mod filters;
pub mod metrics;
pub mod processor;
pub mod types;
