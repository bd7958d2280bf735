//! Policies
//!
//! Stored governance policies, the template/community law and the step
//! whitelist check.

mod models;
pub mod sandbox;
mod store;

pub use models::*;
pub use store::{PolicyFilter, PolicyStore};
