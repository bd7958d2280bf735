//! Platform installation lifecycle

use crate::community::{CommunityPlatform, CommunityPlatformSummary, NewInstallation, Platform};
use crate::db::Table;
use crate::error::AppError;
use crate::governance::Governance;
use crate::integrations::lookup_str;
use crate::metagov::MetagovError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where an install grant came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantSource {
    /// Exchanged by this server with the platform's token endpoint
    Exchanged,
    /// Relayed in a request body, e.g. by the broker after its own OAuth flow
    Relayed,
}

/// Result of completing an install
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub community_id: Uuid,
    pub metagov_slug: String,
    pub platform: CommunityPlatformSummary,
    pub created: bool,
    /// The community was registered with the governance broker
    pub registered: bool,
}

impl Governance {
    /// Record an install from the platform's OAuth grant. `community_id`
    /// attaches a new platform to an existing community. A relayed grant may
    /// only create a platform, never update one.
    pub async fn install_platform(
        &self,
        platform: Platform,
        payload: &Value,
        community_id: Option<Uuid>,
        source: GrantSource,
    ) -> Result<InstallReport, AppError> {
        let adapter = self.adapters.get(platform)?;
        let grant = adapter.parse_oauth(payload)?;

        if let Some(existing) = self.communities.find_platform(platform, &grant.team_id).await {
            if source == GrantSource::Relayed {
                warn!("Rejected relayed reinstall of {} team {}", platform, existing.team_id);
                return Err(AppError::Conflict(format!(
                    "{} team {} is already installed; reinstall through OAuth",
                    platform, existing.team_id
                )));
            }
        }

        // Self-hosted platforms are addressed by their instance URL
        let api_base = match lookup_str(payload, "api_base") {
            Some(base) => base.to_string(),
            None if adapter.default_api_base().is_empty() => grant.team_id.clone(),
            None => String::new(),
        };

        let installation = self
            .communities
            .install(NewInstallation {
                platform,
                team_id: grant.team_id,
                community_name: grant.community_name,
                api_base,
                credentials: grant.credentials,
                community_id,
            })
            .await?;

        let community = match installation.community.metagov_slug {
            Some(_) => installation.community,
            None => {
                self.communities
                    .set_metagov_slug(installation.community.id, installation.platform.metagov_slug())
                    .await?
            }
        };
        let slug = community.metagov_slug.clone().unwrap_or_else(|| installation.platform.metagov_slug());
        self.db.save(Table::Communities, community.id, &community).await;
        self.db
            .save(Table::CommunityPlatforms, installation.platform.id, &installation.platform)
            .await;

        if let Some(installer) = grant.installer {
            let (mut user, _) = self
                .communities
                .get_or_create_user(
                    installation.platform.id,
                    &installer.username,
                    installer.readable_name.as_deref(),
                )
                .await?;
            // Only the installer of a new platform starts out as its admin
            if installation.created {
                user.is_community_admin |= installer.is_admin;
            }
            if installer.access_token.is_some() {
                user.access_token = installer.access_token;
            }
            if installer.readable_name.is_some() {
                user.readable_name = installer.readable_name;
            }
            let user = self.communities.save_user(user).await;
            self.db.save(Table::CommunityUsers, user.id, &user).await;
        }

        let registered = self.register_with_broker(community.id, &slug).await;

        Ok(InstallReport {
            community_id: community.id,
            metagov_slug: slug,
            platform: CommunityPlatformSummary::from(&installation.platform),
            created: installation.created,
            registered,
        })
    }

    /// Register the community and all its active platforms as broker plugins
    async fn register_with_broker(&self, community_id: Uuid, slug: &str) -> bool {
        let platforms: Vec<_> = self
            .communities
            .list_platforms()
            .await
            .into_iter()
            .filter(|p| p.community_id == community_id && p.is_active)
            .collect();
        let readable_name = platforms
            .first()
            .map(|p| p.community_name.clone())
            .unwrap_or_else(|| slug.to_string());
        let plugins = platforms
            .iter()
            .map(|p| json!({"name": p.metagov_plugin, "config": {"team_id": p.team_id}}))
            .collect();

        match self.broker.register_community(slug, &readable_name, plugins).await {
            Ok(_) => true,
            Err(MetagovError::Disabled) => {
                debug!("Metagov disabled, not registering '{}'", slug);
                false
            }
            Err(e) => {
                error!("Failed to register community '{}' with Metagov: {}", slug, e);
                false
            }
        }
    }

    /// Stop governing a platform without deleting its records
    pub async fn disable_platform(&self, platform: &CommunityPlatform) -> Result<CommunityPlatform, AppError> {
        let record = self.communities.deactivate(platform.id).await?;
        self.db.save(Table::CommunityPlatforms, record.id, &record).await;
        info!("Disabled {} integration {}", record.platform, record.team_id);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::harness;
    use crate::metagov::fake::FakeBroker;

    #[tokio::test]
    async fn test_install_sets_slug_and_registers() {
        let h = harness(FakeBroker::default()).await;
        let report = h
            .governance
            .install_platform(
                Platform::Github,
                &json!({
                    "team_id": 4242,
                    "community_name": "acme-org",
                    "access_token": "ghs-1",
                    "user": {"id": "octocat", "access_token": "gho-1"}
                }),
                None,
                GrantSource::Relayed,
            )
            .await
            .unwrap();

        assert!(report.created);
        assert!(report.registered);
        assert_eq!(report.metagov_slug, "github-4242");
        assert_eq!(h.broker.calls(), ["register github-4242 acme-org 1"]);

        let installer = h
            .governance
            .communities
            .find_user(report.platform.id, "octocat")
            .await
            .unwrap();
        assert!(installer.is_community_admin);
        assert_eq!(installer.access_token.as_deref(), Some("gho-1"));
    }

    #[tokio::test]
    async fn test_install_into_parent_community() {
        let h = harness(FakeBroker::default()).await;
        let report = h
            .governance
            .install_platform(
                Platform::Discourse,
                &json!({"url": "https://forum.acme.org/", "api_key": "k"}),
                Some(h.platform.community_id),
                GrantSource::Relayed,
            )
            .await
            .unwrap();

        assert_eq!(report.community_id, h.platform.community_id);
        assert_eq!(report.metagov_slug, "slack-t1");
        assert_eq!(h.broker.calls(), ["register slack-t1 Acme 2"]);

        let discourse = h
            .governance
            .communities
            .get_platform(report.platform.id)
            .await
            .unwrap();
        assert_eq!(discourse.api_base, "https://forum.acme.org");
    }

    #[tokio::test]
    async fn test_unknown_parent_community() {
        let h = harness(FakeBroker::default()).await;
        let err = h
            .governance
            .install_platform(Platform::Github, &json!({"team_id": 1}), Some(Uuid::new_v4()), GrantSource::Relayed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_relayed_grant_cannot_touch_installed_team() {
        let h = harness(FakeBroker::default()).await;
        let grant = json!({
            "team": {"id": "T1", "name": "Acme"},
            "access_token": "xoxb-forged",
            "authed_user": {"id": "EVE", "access_token": "xoxp-eve"},
            "api_base": "http://attacker.test/"
        });

        let err = h
            .governance
            .install_platform(Platform::Slack, &grant, None, GrantSource::Relayed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let record = h.governance.communities.get_platform(h.platform.id).await.unwrap();
        assert_eq!(record.credentials.access_token.as_deref(), Some("xoxb-bot"));
        assert!(h.governance.communities.find_user(h.platform.id, "EVE").await.is_none());
    }

    #[tokio::test]
    async fn test_exchanged_reinstall_keeps_api_base_and_admins() {
        let h = harness(FakeBroker::default()).await;
        let grant = json!({
            "team": {"id": "T1", "name": "Acme"},
            "access_token": "xoxb-new",
            "authed_user": {"id": "EVE", "access_token": "xoxp-eve"},
            "api_base": "http://attacker.test/"
        });

        let report = h
            .governance
            .install_platform(Platform::Slack, &grant, None, GrantSource::Exchanged)
            .await
            .unwrap();
        assert!(!report.created);

        let record = h.governance.communities.get_platform(h.platform.id).await.unwrap();
        assert_eq!(record.api_base, h.platform.api_base);
        assert_eq!(record.credentials.access_token.as_deref(), Some("xoxb-new"));
        let eve = h.governance.communities.find_user(h.platform.id, "EVE").await.unwrap();
        assert!(!eve.is_community_admin);
    }

    #[tokio::test]
    async fn test_disable_keeps_records() {
        let h = harness(FakeBroker::default()).await;
        let disabled = h.governance.disable_platform(&h.platform).await.unwrap();
        assert!(!disabled.is_active);
        assert!(h
            .governance
            .communities
            .find_platform(Platform::Slack, "T1")
            .await
            .is_some());
    }
}
