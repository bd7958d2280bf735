//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::auth::{AuthBackends, OAuthExchange, OAuthStates};
use crate::config::Settings;
use crate::governance::Governance;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Stores, adapters, broker client and dispatcher
    pub governance: Governance,

    /// Login backend per platform
    pub auth_backends: AuthBackends,

    /// Nonces handed out for platform OAuth flows
    pub oauth_states: OAuthStates,

    /// Install code exchange with platform token endpoints
    pub oauth_exchange: OAuthExchange,
}

impl AppState {
    pub fn new(settings: Settings, governance: Governance) -> Self {
        Self {
            governance,
            auth_backends: AuthBackends::with_defaults(),
            oauth_states: OAuthStates::new(),
            oauth_exchange: OAuthExchange::new(&settings.oauth),
            settings,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.settings.auth.jwt_secret
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
