//! Authentication and authorization module
//!
//! Platform auth backends resolve a community user, who then gets a JWT
//! session. Roles follow the user's community admin flag.

mod backends;
mod jwt;
mod middleware;
mod nonce;
mod oauth;

pub use backends::{AuthBackends, LoginRequest};
pub use jwt::{create_tokens, decode_token, refresh_tokens, verify_refresh_token, Claims, TokenPair, TokenType};
pub use middleware::{auth_middleware, optional_session, require_role};
pub use nonce::{IssuedState, OAuthStates};
pub use oauth::OAuthExchange;

use serde::{Deserialize, Serialize};

/// Session roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can view and submit constitution actions
    #[default]
    Member,
    /// Can edit policies and decide or execute proposals
    Admin,
}

impl Role {
    pub fn for_admin_flag(is_community_admin: bool) -> Self {
        if is_community_admin {
            Role::Admin
        } else {
            Role::Member
        }
    }

    pub fn can_govern(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Admin => write!(f, "admin"),
        }
    }
}
