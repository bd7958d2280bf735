//! Platform authentication backends
//!
//! Each backend resolves a login attempt to a community user, or to nobody.
//! Failures are logged and never surface details to the caller.

use crate::community::{CommunityStore, CommunityUser, Platform};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use validator::Validate;

/// Login attempt for one platform community
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub platform: Platform,
    #[validate(length(min = 1, message = "teamId is required"))]
    pub team_id: String,
    pub user_id: Option<String>,
    pub user_token: Option<String>,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, communities: &CommunityStore, request: &LoginRequest) -> Option<CommunityUser>;
}

/// Matches the platform user's stored OAuth token
pub struct TokenBackend;

#[async_trait]
impl AuthBackend for TokenBackend {
    async fn authenticate(&self, communities: &CommunityStore, request: &LoginRequest) -> Option<CommunityUser> {
        let Some(platform) = communities.find_platform(request.platform, &request.team_id).await else {
            warn!(
                "Login failed: no {} community with team id {}",
                request.platform, request.team_id
            );
            return None;
        };
        let (Some(user_id), Some(token)) = (&request.user_id, &request.user_token) else {
            warn!("Login failed: user id and token are required for {}", request.platform);
            return None;
        };
        let Some(user) = communities.find_user(platform.id, user_id).await else {
            warn!("Login failed: unknown {} user {}", request.platform, user_id);
            return None;
        };
        if user.access_token.as_deref() != Some(token.as_str()) {
            warn!("Login failed: token mismatch for {} user {}", request.platform, user_id);
            return None;
        }
        Some(user)
    }
}

/// Open Collective logins resolve to the community's first user
pub struct OpencollectiveBackend;

#[async_trait]
impl AuthBackend for OpencollectiveBackend {
    async fn authenticate(&self, communities: &CommunityStore, request: &LoginRequest) -> Option<CommunityUser> {
        let Some(platform) = communities
            .find_platform(Platform::Opencollective, &request.team_id)
            .await
        else {
            error!("No Open Collective community with team id {}", request.team_id);
            return None;
        };
        let user = communities.first_user(platform.id).await;
        if user.is_none() {
            warn!("Open Collective community {} has no users", request.team_id);
        }
        user
    }
}

/// Backend per platform
#[derive(Clone, Default)]
pub struct AuthBackends {
    backends: HashMap<Platform, Arc<dyn AuthBackend>>,
}

impl AuthBackends {
    pub fn with_defaults() -> Self {
        let mut backends = Self::default();
        for platform in [
            Platform::Slack,
            Platform::Discord,
            Platform::Discourse,
            Platform::Reddit,
            Platform::Github,
        ] {
            backends.register(platform, Arc::new(TokenBackend));
        }
        backends.register(Platform::Opencollective, Arc::new(OpencollectiveBackend));
        backends
    }

    pub fn register(&mut self, platform: Platform, backend: Arc<dyn AuthBackend>) {
        self.backends.insert(platform, backend);
    }

    /// Try the backend for the request's platform
    pub async fn authenticate(&self, communities: &CommunityStore, request: &LoginRequest) -> Option<CommunityUser> {
        match self.backends.get(&request.platform) {
            Some(backend) => backend.authenticate(communities, request).await,
            None => {
                warn!("No auth backend for {}", request.platform);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::{Credentials, NewInstallation};

    async fn installed(platform: Platform, team_id: &str) -> (CommunityStore, uuid::Uuid) {
        let store = CommunityStore::new();
        let installation = store
            .install(NewInstallation {
                platform,
                team_id: team_id.to_string(),
                community_name: "Acme".to_string(),
                api_base: String::new(),
                credentials: Credentials::default(),
                community_id: None,
            })
            .await
            .unwrap();
        (store, installation.platform.id)
    }

    fn request(platform: Platform, user_id: Option<&str>, token: Option<&str>) -> LoginRequest {
        LoginRequest {
            platform,
            team_id: "T1".to_string(),
            user_id: user_id.map(str::to_string),
            user_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_token_backend_matches_stored_token() {
        let (store, platform_id) = installed(Platform::Slack, "T1").await;
        let mut user = CommunityUser::new(platform_id, "U1");
        user.access_token = Some("xoxp-1".to_string());
        store.save_user(user).await;

        let backends = AuthBackends::with_defaults();
        let ok = backends
            .authenticate(&store, &request(Platform::Slack, Some("U1"), Some("xoxp-1")))
            .await;
        assert_eq!(ok.unwrap().username, "U1");

        let wrong = backends
            .authenticate(&store, &request(Platform::Slack, Some("U1"), Some("stolen")))
            .await;
        assert!(wrong.is_none());

        let unknown_team = LoginRequest {
            team_id: "T9".to_string(),
            ..request(Platform::Slack, Some("U1"), Some("xoxp-1"))
        };
        assert!(backends.authenticate(&store, &unknown_team).await.is_none());
    }

    #[tokio::test]
    async fn test_opencollective_returns_first_user() {
        let (store, platform_id) = installed(Platform::Opencollective, "T1").await;
        let (first, _) = store.get_or_create_user(platform_id, "ada", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.get_or_create_user(platform_id, "bob", None).await.unwrap();

        let user = OpencollectiveBackend
            .authenticate(&store, &request(Platform::Opencollective, None, None))
            .await
            .unwrap();
        assert_eq!(user.id, first.id);
    }

    #[tokio::test]
    async fn test_opencollective_unknown_community() {
        let store = CommunityStore::new();
        assert!(OpencollectiveBackend
            .authenticate(&store, &request(Platform::Opencollective, None, None))
            .await
            .is_none());
    }
}
