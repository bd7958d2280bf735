//! Policy storage

use crate::action::ActionKind;
use crate::error::AppError;
use crate::policy::{sandbox, Policy, PolicyError, PolicyKind};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Optional list filters
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    pub community_id: Option<Uuid>,
    pub kind: Option<PolicyKind>,
    pub is_template: Option<bool>,
}

/// Thread-safe policy store
pub struct PolicyStore {
    policies: Arc<RwLock<HashMap<Uuid, Policy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn restore(&self, policies: Vec<Policy>) {
        let mut map = self.policies.write().await;
        map.extend(policies.into_iter().map(|p| (p.id, p)));
    }

    /// Validate, whitelist-check and store a policy (insert or replace)
    pub async fn save(&self, mut policy: Policy) -> Result<Policy, PolicyError> {
        policy.validate()?;
        for (step, body) in policy.steps.iter() {
            if let Err(e) = sandbox::check(body) {
                warn!("Policy '{}' rejected in {} step: {}", policy.name, step, e);
                return Err(e);
            }
        }

        policy.modified_at = Utc::now();
        let mut policies = self.policies.write().await;
        policies.insert(policy.id, policy.clone());
        info!("Saved {:?} policy '{}'", policy.kind, policy.name);
        Ok(policy)
    }

    pub async fn get(&self, id: Uuid) -> Result<Policy, AppError> {
        let policies = self.policies.read().await;
        policies
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", id)))
    }

    /// List policies, most recently modified first
    pub async fn list(&self, filter: &PolicyFilter) -> Vec<Policy> {
        let policies = self.policies.read().await;
        let mut list: Vec<_> = policies
            .values()
            .filter(|p| filter.community_id.map_or(true, |c| p.community_id == Some(c)))
            .filter(|p| filter.kind.map_or(true, |k| p.kind == k))
            .filter(|p| filter.is_template.map_or(true, |t| p.is_template == t))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        list
    }

    /// Active, non-template policies of a community that govern the action,
    /// most recently modified first
    pub async fn eligible_for(
        &self,
        community_id: Uuid,
        kind: ActionKind,
        action_type: &str,
    ) -> Vec<Policy> {
        let policies = self.policies.read().await;
        let mut list: Vec<_> = policies
            .values()
            .filter(|p| p.is_active && !p.is_template)
            .filter(|p| p.community_id == Some(community_id))
            .filter(|p| p.governs(kind, action_type))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        list
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Policy, AppError> {
        let mut policies = self.policies.write().await;
        let policy = policies
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", id)))?;
        policy.is_active = is_active;
        policy.modified_at = Utc::now();
        Ok(policy.clone())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let mut policies = self.policies.write().await;
        policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Policy {} not found", id)))
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
