//! Constitution actions change the community's own policies

use crate::action::{ActionKind, GovernableAction};
use crate::community::CommunityPlatform;
use crate::db::Table;
use crate::error::AppError;
use crate::governance::Governance;
use crate::policy::{Policy, PolicyFilter, PolicyKind, PolicySteps};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

pub const ADD_POLICY: &str = "policykitaddcommunitypolicy";
pub const CHANGE_POLICY: &str = "policykitchangecommunitypolicy";
pub const REMOVE_POLICY: &str = "policykitremovecommunitypolicy";

/// Constitution action codenames
pub const CONSTITUTION_ACTIONS: &[&str] = &[ADD_POLICY, CHANGE_POLICY, REMOVE_POLICY];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyChange {
    policy_id: Option<Uuid>,
    kind: Option<PolicyKind>,
    name: Option<String>,
    description: Option<String>,
    action_types: Option<Vec<String>>,
    steps: Option<PolicySteps>,
    is_active: Option<bool>,
}

impl Governance {
    pub(crate) async fn apply_constitution_action(
        &self,
        platform: &CommunityPlatform,
        action: &GovernableAction,
    ) -> Result<(), AppError> {
        let change: PolicyChange = serde_json::from_value(Value::Object(action.content.clone()))
            .map_err(|e| AppError::Validation(format!("Invalid {} content: {}", action.action_type, e)))?;
        let community_id = platform.community_id;

        match action.action_type.as_str() {
            ADD_POLICY => {
                let name = change
                    .name
                    .ok_or_else(|| AppError::Validation("name is required".to_string()))?;
                let mut policy = Policy::new(
                    change.kind.unwrap_or(ActionKind::Platform),
                    name,
                    Some(community_id),
                );
                policy.description = change.description;
                policy.action_types = change.action_types.unwrap_or_default();
                policy.steps = change.steps.unwrap_or_default();
                policy.is_active = change.is_active.unwrap_or(true);

                let policy = self.policies.save(policy).await?;
                self.db.save(Table::Policies, policy.id, &policy).await;
                info!("Added policy '{}' to community {}", policy.name, community_id);
            }
            CHANGE_POLICY => {
                let mut policy = self.community_policy(change.policy_id, community_id).await?;
                if let Some(kind) = change.kind {
                    policy.kind = kind;
                }
                if let Some(name) = change.name {
                    policy.name = name;
                }
                if change.description.is_some() {
                    policy.description = change.description;
                }
                if let Some(action_types) = change.action_types {
                    policy.action_types = action_types;
                }
                if let Some(steps) = change.steps {
                    policy.steps = steps;
                }
                if let Some(is_active) = change.is_active {
                    policy.is_active = is_active;
                }

                let policy = self.policies.save(policy).await?;
                self.db.save(Table::Policies, policy.id, &policy).await;
                info!("Changed policy '{}'", policy.name);
            }
            REMOVE_POLICY => {
                let policy = self.community_policy(change.policy_id, community_id).await?;
                self.policies.delete(policy.id).await?;
                self.db.remove(Table::Policies, policy.id).await;
                info!("Removed policy '{}'", policy.name);
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unknown constitution action '{}'",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Copy template policies into a community. Empty `template_ids` copies
    /// every template.
    pub async fn apply_templates(
        &self,
        community_id: Uuid,
        template_ids: &[Uuid],
    ) -> Result<Vec<Policy>, AppError> {
        let templates = self
            .policies
            .list(&PolicyFilter {
                is_template: Some(true),
                ..Default::default()
            })
            .await;

        let mut created = Vec::new();
        for template in templates
            .into_iter()
            .filter(|t| template_ids.is_empty() || template_ids.contains(&t.id))
        {
            let mut policy = Policy::new(template.kind, template.name, Some(community_id));
            policy.description = template.description;
            policy.action_types = template.action_types;
            policy.steps = template.steps;

            let policy = self.policies.save(policy).await?;
            self.db.save(Table::Policies, policy.id, &policy).await;
            created.push(policy);
        }
        info!("Applied {} template policies to community {}", created.len(), community_id);
        Ok(created)
    }

    async fn community_policy(&self, id: Option<Uuid>, community_id: Uuid) -> Result<Policy, AppError> {
        let id = id.ok_or_else(|| AppError::Validation("policyId is required".to_string()))?;
        let policy = self.policies.get(id).await?;
        if policy.community_id != Some(community_id) {
            return Err(AppError::Forbidden(format!(
                "Policy {} belongs to another community",
                id
            )));
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::{harness, settled};
    use crate::integrations::NormalizedAction;
    use crate::metagov::fake::FakeBroker;
    use crate::proposal::ProposalStatus;
    use serde_json::json;

    fn constitution(action_type: &str, content: Value) -> NormalizedAction {
        NormalizedAction {
            kind: ActionKind::Constitution,
            action_type: action_type.to_string(),
            initiator: None,
            content: content.as_object().cloned().unwrap_or_default(),
            community_origin: false,
        }
    }

    #[tokio::test]
    async fn test_passed_add_policy_creates_policy() {
        let h = harness(FakeBroker::default()).await;
        let base = Policy::new(ActionKind::Constitution, "Admins decide", Some(h.platform.community_id));
        h.governance.policies.save(base).await.unwrap();

        let submission = h
            .governance
            .submit_action(
                &h.platform,
                constitution(
                    ADD_POLICY,
                    json!({"name": "Renames need a vote", "actionTypes": ["slackrenameconversation"]}),
                ),
                "c1".to_string(),
            )
            .await
            .unwrap();
        let id = submission.proposals[0].id;
        h.governance.decide(id, ProposalStatus::Passed).await.unwrap();
        settled(&h.governance, id).await;

        let names: Vec<_> = h
            .governance
            .policies
            .list(&PolicyFilter {
                community_id: Some(h.platform.community_id),
                kind: Some(ActionKind::Platform),
                ..Default::default()
            })
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert!(names.contains(&"Renames need a vote".to_string()));
    }

    #[tokio::test]
    async fn test_sandbox_violation_fails_dispatch() {
        let h = harness(FakeBroker::default()).await;
        let base = Policy::new(ActionKind::Constitution, "Admins decide", Some(h.platform.community_id));
        h.governance.policies.save(base).await.unwrap();

        let submission = h
            .governance
            .submit_action(
                &h.platform,
                constitution(ADD_POLICY, json!({"name": "Bad", "steps": {"check": "import os"}})),
                "c2".to_string(),
            )
            .await
            .unwrap();
        let id = submission.proposals[0].id;
        h.governance.proposals.decide(id, ProposalStatus::Passed).await.unwrap();

        let err = h.governance.execute_proposal(id).await.unwrap_err();
        assert!(err.to_string().contains("whitelist"));
    }

    #[tokio::test]
    async fn test_apply_templates_copies_into_community() {
        let h = harness(FakeBroker::default()).await;
        let mut template = Policy::new(ActionKind::Constitution, "Admins decide", None);
        template.is_template = true;
        template.steps.check = "return PASSED".to_string();
        let template = h.governance.policies.save(template).await.unwrap();

        let created = h
            .governance
            .apply_templates(h.platform.community_id, &[])
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_ne!(created[0].id, template.id);
        assert!(!created[0].is_template);
        assert_eq!(created[0].community_id, Some(h.platform.community_id));
        assert_eq!(created[0].steps, template.steps);
    }
}
