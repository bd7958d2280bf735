//! Community data models

use crate::integrations::IntegrationError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));

/// Platforms PolicyKit can govern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Slack,
    Discord,
    Discourse,
    Reddit,
    Github,
    Opencollective,
    Sourcecred,
    Loomio,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Slack,
        Platform::Discord,
        Platform::Discourse,
        Platform::Reddit,
        Platform::Github,
        Platform::Opencollective,
        Platform::Sourcecred,
        Platform::Loomio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Slack => "slack",
            Platform::Discord => "discord",
            Platform::Discourse => "discourse",
            Platform::Reddit => "reddit",
            Platform::Github => "github",
            Platform::Opencollective => "opencollective",
            Platform::Sourcecred => "sourcecred",
            Platform::Loomio => "loomio",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| IntegrationError::UnknownPlatform(s.to_string()))
    }
}

/// A group of users that may exist on one or more platforms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: Uuid,
    /// Slug of the matching community in the governance broker
    pub metagov_slug: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            metagov_slug: None,
            created_at: Utc::now(),
        }
    }
}

/// Credentials granted to PolicyKit when a platform community installs it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: Option<String>,
    pub bot_id: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    /// Overwrite only the fields present in `other`
    pub fn merge(&mut self, other: Credentials) {
        if other.access_token.is_some() {
            self.access_token = other.access_token;
        }
        if other.bot_id.is_some() {
            self.bot_id = other.bot_id;
        }
        if other.refresh_token.is_some() {
            self.refresh_token = other.refresh_token;
        }
    }
}

/// One platform-side community (a Slack workspace, a subreddit, a GitHub installation...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPlatform {
    pub id: Uuid,
    /// Parent community
    pub community_id: Uuid,
    pub platform: Platform,
    /// External identifier, unique per platform
    pub team_id: String,
    pub community_name: String,
    /// Base URL that API method names are appended to
    pub api_base: String,
    pub credentials: Credentials,
    /// Name of the broker plugin backing this platform
    pub metagov_plugin: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityPlatform {
    /// Slug identifying this installation in the governance broker
    pub fn metagov_slug(&self) -> String {
        slugify(&format!("{} {}", self.platform, self.team_id))
    }
}

/// Public view of a platform community (no credentials)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityPlatformSummary {
    pub id: Uuid,
    pub community_id: Uuid,
    pub platform: Platform,
    pub team_id: String,
    pub community_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&CommunityPlatform> for CommunityPlatformSummary {
    fn from(p: &CommunityPlatform) -> Self {
        Self {
            id: p.id,
            community_id: p.community_id,
            platform: p.platform,
            team_id: p.team_id.clone(),
            community_name: p.community_name.clone(),
            is_active: p.is_active,
            created_at: p.created_at,
        }
    }
}

/// A platform user scoped to one platform community
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityUser {
    pub id: Uuid,
    pub community_platform_id: Uuid,
    /// Platform-side user identifier
    pub username: String,
    pub readable_name: Option<String>,
    pub access_token: Option<String>,
    pub is_community_admin: bool,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CommunityUser {
    pub fn new(community_platform_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            community_platform_id,
            username: username.into(),
            readable_name: None,
            access_token: None,
            is_community_admin: false,
            avatar: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.readable_name.as_deref().unwrap_or(&self.username)
    }
}

/// Public view of a community user (no token)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityUserSummary {
    pub id: Uuid,
    pub community_platform_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub is_community_admin: bool,
    pub avatar: Option<String>,
}

impl From<&CommunityUser> for CommunityUserSummary {
    fn from(u: &CommunityUser) -> Self {
        Self {
            id: u.id,
            community_platform_id: u.community_platform_id,
            username: u.username.clone(),
            display_name: u.display_name().to_string(),
            is_community_admin: u.is_community_admin,
            avatar: u.avatar.clone(),
        }
    }
}

/// Everything needed to record an install / OAuth completion
#[derive(Debug, Clone)]
pub struct NewInstallation {
    pub platform: Platform,
    pub team_id: String,
    pub community_name: String,
    pub api_base: String,
    pub credentials: Credentials,
    /// Attach to an existing parent community instead of creating one
    pub community_id: Option<Uuid>,
}

/// Result of an install
#[derive(Debug, Clone)]
pub struct Installation {
    pub community: Community,
    pub platform: CommunityPlatform,
    pub created: bool,
}

/// Lowercase, dash-separated slug
pub fn slugify(value: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&value.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}
