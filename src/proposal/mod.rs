//! Proposals
//!
//! The governance record wrapping one pending action, with its votes.

mod models;
mod store;

pub use models::*;
pub use store::ProposalStore;
