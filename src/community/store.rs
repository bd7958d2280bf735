//! Community storage
//!
//! In-memory store for communities, platform installations and platform users.
//! Lock order is always communities -> platforms -> users.

use crate::community::{
    Community, CommunityPlatform, CommunityUser, Installation, NewInstallation, Platform,
};
use crate::error::AppError;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Thread-safe community store
pub struct CommunityStore {
    communities: RwLock<HashMap<Uuid, Community>>,
    platforms: RwLock<HashMap<Uuid, CommunityPlatform>>,
    users: RwLock<HashMap<Uuid, CommunityUser>>,
}

impl CommunityStore {
    pub fn new() -> Self {
        Self {
            communities: RwLock::new(HashMap::new()),
            platforms: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Load previously persisted records
    pub async fn restore(
        &self,
        communities: Vec<Community>,
        platforms: Vec<CommunityPlatform>,
        users: Vec<CommunityUser>,
    ) {
        let mut c = self.communities.write().await;
        let mut p = self.platforms.write().await;
        let mut u = self.users.write().await;
        c.extend(communities.into_iter().map(|x| (x.id, x)));
        p.extend(platforms.into_iter().map(|x| (x.id, x)));
        u.extend(users.into_iter().map(|x| (x.id, x)));
    }

    // =========================================================================
    // INSTALLATIONS
    // =========================================================================

    /// Record an install. Reinstalling an existing (platform, team_id) updates
    /// its credentials and reactivates it. Its community and API base stay.
    pub async fn install(&self, new: NewInstallation) -> Result<Installation, AppError> {
        let mut communities = self.communities.write().await;
        let mut platforms = self.platforms.write().await;

        if let Some(existing) = platforms
            .values_mut()
            .find(|p| p.platform == new.platform && p.team_id == new.team_id)
        {
            existing.community_name = new.community_name;
            existing.credentials.merge(new.credentials);
            existing.is_active = true;
            existing.updated_at = Utc::now();

            let community = communities
                .get(&existing.community_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "Community {} missing for platform {}",
                        existing.community_id, existing.id
                    ))
                })?;

            info!("Updated {} installation for team {}", existing.platform, existing.team_id);
            return Ok(Installation {
                community,
                platform: existing.clone(),
                created: false,
            });
        }

        let community = match new.community_id {
            Some(id) => communities
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Community {} not found", id)))?,
            None => {
                let community = Community::new();
                communities.insert(community.id, community.clone());
                community
            }
        };

        let now = Utc::now();
        let platform = CommunityPlatform {
            id: Uuid::new_v4(),
            community_id: community.id,
            platform: new.platform,
            team_id: new.team_id,
            community_name: new.community_name,
            api_base: new.api_base,
            credentials: new.credentials,
            metagov_plugin: new.platform.as_str().to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        platforms.insert(platform.id, platform.clone());

        info!("Installed {} for team {}", platform.platform, platform.team_id);
        Ok(Installation {
            community,
            platform,
            created: true,
        })
    }

    /// Deactivate an installation without deleting it
    pub async fn deactivate(&self, platform_id: Uuid) -> Result<CommunityPlatform, AppError> {
        let mut platforms = self.platforms.write().await;
        let platform = platforms
            .get_mut(&platform_id)
            .ok_or_else(|| AppError::NotFound(format!("Community platform {} not found", platform_id)))?;

        platform.is_active = false;
        platform.updated_at = Utc::now();
        info!("Deactivated {} integration {}", platform.platform, platform.team_id);
        Ok(platform.clone())
    }

    pub async fn get_community(&self, id: Uuid) -> Result<Community, AppError> {
        let communities = self.communities.read().await;
        communities
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Community {} not found", id)))
    }

    pub async fn find_by_metagov_slug(&self, slug: &str) -> Option<Community> {
        let communities = self.communities.read().await;
        communities
            .values()
            .find(|c| c.metagov_slug.as_deref() == Some(slug))
            .cloned()
    }

    pub async fn set_metagov_slug(&self, id: Uuid, slug: String) -> Result<Community, AppError> {
        let mut communities = self.communities.write().await;
        let community = communities
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Community {} not found", id)))?;
        community.metagov_slug = Some(slug);
        Ok(community.clone())
    }

    pub async fn get_platform(&self, id: Uuid) -> Result<CommunityPlatform, AppError> {
        let platforms = self.platforms.read().await;
        platforms
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Community platform {} not found", id)))
    }

    /// Find an installation by its external identifier (active or not)
    pub async fn find_platform(&self, platform: Platform, team_id: &str) -> Option<CommunityPlatform> {
        let platforms = self.platforms.read().await;
        platforms
            .values()
            .find(|p| p.platform == platform && p.team_id == team_id)
            .cloned()
    }

    /// Find the active installation of `platform` inside a parent community
    pub async fn platform_in_community(
        &self,
        community_id: Uuid,
        platform: Platform,
    ) -> Option<CommunityPlatform> {
        let platforms = self.platforms.read().await;
        platforms
            .values()
            .find(|p| p.community_id == community_id && p.platform == platform && p.is_active)
            .cloned()
    }

    pub async fn list_platforms(&self) -> Vec<CommunityPlatform> {
        let platforms = self.platforms.read().await;
        let mut list: Vec<_> = platforms.values().cloned().collect();
        list.sort_by_key(|p| p.created_at);
        list
    }

    // =========================================================================
    // USERS
    // =========================================================================

    /// Get or create the user `username` in a platform community
    pub async fn get_or_create_user(
        &self,
        platform_id: Uuid,
        username: &str,
        readable_name: Option<&str>,
    ) -> Result<(CommunityUser, bool), AppError> {
        {
            let platforms = self.platforms.read().await;
            if !platforms.contains_key(&platform_id) {
                return Err(AppError::NotFound(format!(
                    "Community platform {} not found",
                    platform_id
                )));
            }
        }

        let mut users = self.users.write().await;
        if let Some(user) = users
            .values()
            .find(|u| u.community_platform_id == platform_id && u.username == username)
        {
            return Ok((user.clone(), false));
        }

        let mut user = CommunityUser::new(platform_id, username);
        user.readable_name = readable_name.map(str::to_string);
        users.insert(user.id, user.clone());
        debug!("Created community user {} on platform {}", username, platform_id);
        Ok((user, true))
    }

    /// Insert or replace a user record
    pub async fn save_user(&self, user: CommunityUser) -> CommunityUser {
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        user
    }

    pub async fn get_user(&self, id: Uuid) -> Option<CommunityUser> {
        let users = self.users.read().await;
        users.get(&id).cloned()
    }

    pub async fn find_user(&self, platform_id: Uuid, username: &str) -> Option<CommunityUser> {
        let users = self.users.read().await;
        users
            .values()
            .find(|u| u.community_platform_id == platform_id && u.username == username)
            .cloned()
    }

    /// Find a user on any installation of `platform` by readable name
    pub async fn find_user_by_readable_name(
        &self,
        platform: Platform,
        readable_name: &str,
    ) -> Option<CommunityUser> {
        let platforms = self.platforms.read().await;
        let users = self.users.read().await;
        users
            .values()
            .filter(|u| u.readable_name.as_deref() == Some(readable_name))
            .find(|u| {
                platforms
                    .get(&u.community_platform_id)
                    .is_some_and(|p| p.platform == platform)
            })
            .cloned()
    }

    /// Users of a platform community, oldest first
    pub async fn users_for_platform(&self, platform_id: Uuid) -> Vec<CommunityUser> {
        let users = self.users.read().await;
        let mut list: Vec<_> = users
            .values()
            .filter(|u| u.community_platform_id == platform_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    pub async fn first_user(&self, platform_id: Uuid) -> Option<CommunityUser> {
        self.users_for_platform(platform_id).await.into_iter().next()
    }

    /// Access token of the first community admin that has one
    pub async fn admin_user_token(&self, platform_id: Uuid) -> Option<String> {
        self.users_for_platform(platform_id)
            .await
            .into_iter()
            .filter(|u| u.is_community_admin)
            .find_map(|u| u.access_token)
    }
}

impl Default for CommunityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::Credentials;
    use pretty_assertions::assert_eq;

    fn slack_install(team_id: &str, token: &str) -> NewInstallation {
        NewInstallation {
            platform: Platform::Slack,
            team_id: team_id.to_string(),
            community_name: "test".to_string(),
            api_base: "https://slack.com/api/".to_string(),
            credentials: Credentials {
                access_token: Some(token.to_string()),
                ..Default::default()
            },
            community_id: None,
        }
    }

    #[tokio::test]
    async fn test_reinstall_updates_instead_of_duplicating() {
        let store = CommunityStore::new();
        let first = store.install(slack_install("T1", "xoxb-1")).await.unwrap();
        assert!(first.created);

        store.deactivate(first.platform.id).await.unwrap();
        let second = store.install(slack_install("T1", "xoxb-2")).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.platform.id, first.platform.id);
        assert!(second.platform.is_active);
        assert_eq!(second.platform.credentials.access_token.as_deref(), Some("xoxb-2"));
        assert_eq!(store.list_platforms().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_platform_joins_existing_community() {
        let store = CommunityStore::new();
        let slack = store.install(slack_install("T1", "xoxb")).await.unwrap();

        let github = store
            .install(NewInstallation {
                platform: Platform::Github,
                team_id: "4242".to_string(),
                community_name: "test".to_string(),
                api_base: "https://api.github.com/".to_string(),
                credentials: Credentials::default(),
                community_id: Some(slack.community.id),
            })
            .await
            .unwrap();

        assert_eq!(github.community.id, slack.community.id);
        assert!(store
            .platform_in_community(slack.community.id, Platform::Github)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_deactivated_platform_is_kept() {
        let store = CommunityStore::new();
        let installed = store.install(slack_install("T1", "xoxb")).await.unwrap();
        store.deactivate(installed.platform.id).await.unwrap();

        let found = store.find_platform(Platform::Slack, "T1").await.unwrap();
        assert!(!found.is_active);
        assert!(store
            .platform_in_community(installed.community.id, Platform::Slack)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_user_is_idempotent() {
        let store = CommunityStore::new();
        let installed = store.install(slack_install("T1", "xoxb")).await.unwrap();
        let pid = installed.platform.id;

        let (first, created) = store.get_or_create_user(pid, "U1", Some("Ada")).await.unwrap();
        assert!(created);
        let (again, created) = store.get_or_create_user(pid, "U1", None).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);

        store.get_or_create_user(pid, "U2", None).await.unwrap();
        assert_eq!(store.first_user(pid).await.unwrap().id, first.id);
        assert_eq!(
            store
                .find_user_by_readable_name(Platform::Slack, "Ada")
                .await
                .map(|u| u.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn test_user_requires_known_platform() {
        let store = CommunityStore::new();
        let result = store.get_or_create_user(Uuid::new_v4(), "U1", None).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
