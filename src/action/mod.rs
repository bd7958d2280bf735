//! Governable actions
//!
//! Platform events normalized into policy-subject actions.

mod models;
mod store;

pub use models::*;
pub use store::ActionStore;
