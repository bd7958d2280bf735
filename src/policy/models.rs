//! Policy data models

use crate::action::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Non template policies must have a community")]
    MissingCommunity,

    #[error("Template policies must not have a community")]
    TemplateWithCommunity,

    #[error("Error at line {lineno}: \"{code}\" Code is not in the whitelist")]
    NonWhitelistedCode { code: String, lineno: usize },

    #[error("No eligible policy governs action type {0}")]
    NoEligiblePolicy(String),
}

/// Policy kinds mirror action kinds
pub type PolicyKind = ActionKind;

/// The six step bodies of a policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySteps {
    pub filter: String,
    pub initialize: String,
    pub check: String,
    pub notify: String,
    pub success: String,
    pub fail: String,
}

impl PolicySteps {
    /// (step name, body) pairs in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("filter", self.filter.as_str()),
            ("initialize", self.initialize.as_str()),
            ("check", self.check.as_str()),
            ("notify", self.notify.as_str()),
            ("success", self.success.as_str()),
            ("fail", self.fail.as_str()),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: Uuid,
    pub kind: PolicyKind,
    pub name: String,
    pub description: Option<String>,
    /// Parent community; required unless the policy is a template
    pub community_id: Option<Uuid>,
    pub is_template: bool,
    pub is_active: bool,
    /// Governed action codenames. Empty means a base policy.
    pub action_types: Vec<String>,
    pub steps: PolicySteps,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(kind: PolicyKind, name: impl Into<String>, community_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            description: None,
            community_id,
            is_template: false,
            is_active: true,
            action_types: Vec::new(),
            steps: PolicySteps::default(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Template/community law
    pub fn validate(&self) -> Result<(), PolicyError> {
        match (self.is_template, self.community_id) {
            (false, None) => Err(PolicyError::MissingCommunity),
            (true, Some(_)) => Err(PolicyError::TemplateWithCommunity),
            _ => Ok(()),
        }
    }

    /// Whether this policy governs an action of `kind` and `action_type`
    pub fn governs(&self, kind: ActionKind, action_type: &str) -> bool {
        if self.kind != kind {
            return false;
        }
        let listed = self.action_types.iter().any(|t| t == action_type);
        match kind {
            ActionKind::Trigger => listed,
            _ => self.action_types.is_empty() || listed,
        }
    }
}
