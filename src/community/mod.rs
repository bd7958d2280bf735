//! Communities, their per-platform installations, and platform users.

mod models;
mod store;

pub use models::*;
pub use store::CommunityStore;
