//! Governance broker (Metagov) bridge
//!
//! HTTP client for the external service that runs long-lived governance
//! processes (votes) on behalf of PolicyKit.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod models;

pub use client::{DisabledBroker, GovernanceBroker, MetagovClient};
pub use models::*;
