//! Governable action data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Which family of policies governs an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// An action taken on the platform itself
    Platform,
    /// A change to the community's own governance
    Constitution,
    /// An event that only triggers policies and is never executed
    Trigger,
}

impl ActionKind {
    pub fn is_governable(&self) -> bool {
        !matches!(self, ActionKind::Trigger)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executed,
    Rejected,
}

impl Default for ActionStatus {
    fn default() -> Self {
        ActionStatus::Pending
    }
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Executed | ActionStatus::Rejected)
    }
}

/// A normalized, policy-subject platform event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernableAction {
    pub id: Uuid,
    pub community_platform_id: Uuid,
    pub initiator_id: Option<Uuid>,
    pub kind: ActionKind,
    /// Codename such as `slackpostmessage`
    pub action_type: String,
    /// Platform-specific fields of the action
    pub content: Map<String, Value>,
    /// True when the action was taken inside the community rather than through PolicyKit
    pub community_origin: bool,
    /// True when the platform-side effect was reverted pending governance
    pub community_revert: bool,
    pub status: ActionStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GovernableAction {
    pub fn new(community_platform_id: Uuid, draft: ActionDraft, idempotency_key: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            community_platform_id,
            initiator_id: draft.initiator_id,
            kind: draft.kind,
            action_type: draft.action_type,
            content: draft.content,
            community_origin: draft.community_origin,
            community_revert: false,
            status: ActionStatus::Pending,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// String field of the action content
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }
}

/// Fields of an action before it is stored
#[derive(Debug, Clone)]
pub struct ActionDraft {
    pub initiator_id: Option<Uuid>,
    pub kind: ActionKind,
    pub action_type: String,
    pub content: Map<String, Value>,
    pub community_origin: bool,
}

/// Idempotency key for a delivery: the platform delivery id when there is one,
/// otherwise the SHA-256 of the raw body.
pub fn idempotency_key(delivery_id: Option<&str>, body: &[u8]) -> String {
    match delivery_id.filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("{:x}", Sha256::digest(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_prefers_delivery_id() {
        assert_eq!(idempotency_key(Some("abc-123"), b"{}"), "abc-123");
    }

    #[test]
    fn test_idempotency_key_hashes_body() {
        let a = idempotency_key(None, b"{\"a\":1}");
        let b = idempotency_key(Some(""), b"{\"a\":1}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, idempotency_key(None, b"{\"a\":2}"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ActionStatus::Pending.is_terminal());
        assert!(ActionStatus::Executed.is_terminal());
        assert!(ActionStatus::Rejected.is_terminal());
        assert!(!ActionKind::Trigger.is_governable());
    }
}
