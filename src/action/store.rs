//! Action storage

use crate::action::{ActionDraft, ActionStatus, GovernableAction};
use crate::error::AppError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Outcome of ingesting a delivery
#[derive(Debug, Clone)]
pub enum Ingested {
    Created(GovernableAction),
    /// The same delivery was already seen
    Duplicate(GovernableAction),
}

impl Ingested {
    pub fn action(&self) -> &GovernableAction {
        match self {
            Ingested::Created(a) | Ingested::Duplicate(a) => a,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Ingested::Duplicate(_))
    }
}

/// Thread-safe action store
pub struct ActionStore {
    actions: Arc<RwLock<HashMap<Uuid, GovernableAction>>>,
}

impl ActionStore {
    pub fn new() -> Self {
        Self {
            actions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn restore(&self, actions: Vec<GovernableAction>) {
        let mut map = self.actions.write().await;
        map.extend(actions.into_iter().map(|a| (a.id, a)));
    }

    /// Store an action unless one with the same key exists for the platform community
    pub async fn ingest(
        &self,
        community_platform_id: Uuid,
        draft: ActionDraft,
        idempotency_key: String,
    ) -> Ingested {
        let mut actions = self.actions.write().await;
        if let Some(existing) = actions.values().find(|a| {
            a.community_platform_id == community_platform_id && a.idempotency_key == idempotency_key
        }) {
            debug!("Duplicate delivery {} ignored", idempotency_key);
            return Ingested::Duplicate(existing.clone());
        }

        let action = GovernableAction::new(community_platform_id, draft, idempotency_key);
        actions.insert(action.id, action.clone());
        Ingested::Created(action)
    }

    pub async fn get(&self, id: Uuid) -> Result<GovernableAction, AppError> {
        let actions = self.actions.read().await;
        actions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Action {} not found", id)))
    }

    /// List actions, newest first
    pub async fn list(
        &self,
        community_platform_id: Option<Uuid>,
        status: Option<ActionStatus>,
    ) -> Vec<GovernableAction> {
        let actions = self.actions.read().await;
        let mut list: Vec<_> = actions
            .values()
            .filter(|a| community_platform_id.map_or(true, |id| a.community_platform_id == id))
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Move a pending action to a terminal status
    pub async fn set_status(&self, id: Uuid, status: ActionStatus) -> Result<GovernableAction, AppError> {
        let mut actions = self.actions.write().await;
        let action = actions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Action {} not found", id)))?;

        if action.status.is_terminal() && action.status != status {
            return Err(AppError::Conflict(format!(
                "Action {} is already {:?}",
                id, action.status
            )));
        }

        action.status = status;
        action.updated_at = Utc::now();
        Ok(action.clone())
    }

    pub async fn mark_reverted(&self, id: Uuid) -> Result<GovernableAction, AppError> {
        let mut actions = self.actions.write().await;
        let action = actions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Action {} not found", id)))?;
        action.community_revert = true;
        action.updated_at = Utc::now();
        Ok(action.clone())
    }
}

impl Default for ActionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use serde_json::Map;

    fn draft() -> ActionDraft {
        ActionDraft {
            initiator_id: None,
            kind: ActionKind::Platform,
            action_type: "slackpostmessage".to_string(),
            content: Map::new(),
            community_origin: true,
        }
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let store = ActionStore::new();
        let platform = Uuid::new_v4();

        let first = store.ingest(platform, draft(), "delivery-1".into()).await;
        let second = store.ingest(platform, draft(), "delivery-1".into()).await;

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.action().id, second.action().id);
        assert_eq!(store.list(Some(platform), None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_key_on_other_platform_is_new() {
        let store = ActionStore::new();
        store.ingest(Uuid::new_v4(), draft(), "k".into()).await;
        let other = store.ingest(Uuid::new_v4(), draft(), "k".into()).await;
        assert!(!other.is_duplicate());
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = ActionStore::new();
        let action = store.ingest(Uuid::new_v4(), draft(), "k".into()).await;
        let id = action.action().id;

        store.set_status(id, ActionStatus::Executed).await.unwrap();
        let err = store.set_status(id, ActionStatus::Rejected).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
