//! Action ingestion and proposal creation

use crate::action::{ActionDraft, GovernableAction};
use crate::community::{CommunityPlatform, Platform};
use crate::db::Table;
use crate::error::AppError;
use crate::governance::Governance;
use crate::integrations::NormalizedAction;
use crate::metagov::BrokerEvent;
use crate::policy::PolicyError;
use crate::proposal::Proposal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Result of submitting an action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub action: GovernableAction,
    /// The action was delivered before; nothing new was created
    pub duplicate: bool,
    pub proposals: Vec<Proposal>,
}

impl Governance {
    /// Record a normalized action once and propose it under the eligible policies
    pub async fn submit_action(
        &self,
        platform: &CommunityPlatform,
        normalized: NormalizedAction,
        idempotency_key: String,
    ) -> Result<Submission, AppError> {
        if !platform.is_active {
            return Err(AppError::Forbidden(format!(
                "{} integration {} is disabled",
                platform.platform, platform.team_id
            )));
        }

        let initiator_id = match &normalized.initiator {
            Some(user) => {
                let (user, created) = self
                    .communities
                    .get_or_create_user(platform.id, &user.username, user.readable_name.as_deref())
                    .await?;
                if created {
                    self.db.save(Table::CommunityUsers, user.id, &user).await;
                }
                Some(user.id)
            }
            None => None,
        };

        let draft = ActionDraft {
            initiator_id,
            kind: normalized.kind,
            action_type: normalized.action_type,
            content: normalized.content,
            community_origin: normalized.community_origin,
        };

        let ingested = self.actions.ingest(platform.id, draft, idempotency_key).await;
        let action = ingested.action().clone();
        if ingested.is_duplicate() {
            debug!("Duplicate delivery of action {}", action.id);
            let proposals = self.proposals.list(Some(action.id), None).await;
            return Ok(Submission {
                action,
                duplicate: true,
                proposals,
            });
        }
        self.db.save(Table::Actions, action.id, &action).await;
        info!(
            "Received {} action {} on {} {}",
            action.action_type, action.id, platform.platform, platform.team_id
        );

        let proposals = self.propose(platform, &action).await?;

        // Taken in the community before any decision: undo it until one is made
        let action = match self.revert_action(platform, &action).await {
            Some(reverted) => reverted,
            None => action,
        };
        Ok(Submission {
            action,
            duplicate: false,
            proposals,
        })
    }

    /// Create proposals for a stored action. A governable action gets one under
    /// its first eligible policy; a trigger action one per eligible policy.
    pub async fn propose(
        &self,
        platform: &CommunityPlatform,
        action: &GovernableAction,
    ) -> Result<Vec<Proposal>, AppError> {
        let eligible = self
            .policies
            .eligible_for(platform.community_id, action.kind, &action.action_type)
            .await;

        let policies = if action.kind.is_governable() {
            let policy = eligible
                .into_iter()
                .next()
                .ok_or_else(|| PolicyError::NoEligiblePolicy(action.action_type.clone()))?;
            vec![policy]
        } else {
            eligible
        };

        let mut proposals = Vec::with_capacity(policies.len());
        for policy in policies {
            let proposal = self
                .proposals
                .create(Proposal::new(action.id, policy.id), action.kind)
                .await?;
            self.db.save(Table::Proposals, proposal.id, &proposal).await;
            info!(
                "Proposed action {} under policy '{}' ({})",
                action.id, policy.name, proposal.id
            );
            proposals.push(proposal);
        }
        Ok(proposals)
    }

    /// Handle a platform event forwarded by the broker. Returns `None` when
    /// the event is not something PolicyKit governs.
    pub async fn submit_broker_event(
        &self,
        event: BrokerEvent,
        idempotency_key: String,
    ) -> Result<Option<Submission>, AppError> {
        if event.initiator.is_metagov_bot {
            debug!("Ignoring {} event from the broker bot", event.event_type);
            return Ok(None);
        }

        let community = self
            .communities
            .find_by_metagov_slug(&event.community)
            .await
            .ok_or_else(|| {
                AppError::NotFound(format!("No community registered as '{}'", event.community))
            })?;
        let platform_kind: Platform = event.source.parse()?;
        let Some(platform) = self
            .communities
            .platform_in_community(community.id, platform_kind)
            .await
        else {
            warn!(
                "No active {} platform in community {} for broker event",
                platform_kind, community.id
            );
            return Ok(None);
        };

        let adapter = self.adapters.get(platform_kind)?;
        let Some(normalized) = adapter.normalize_broker_event(&event) else {
            debug!("Ignoring {}.{} broker event", event.source, event.event_type);
            return Ok(None);
        };

        self.submit_action(&platform, normalized, idempotency_key)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::governance::testing::{harness, methods, post_message};
    use crate::metagov::fake::FakeBroker;
    use crate::metagov::BrokerInitiator;
    use crate::policy::Policy;
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_creates_one_proposal() {
        let h = harness(FakeBroker::default()).await;
        let submission = h
            .governance
            .submit_action(&h.platform, post_message("hi"), "k1".to_string())
            .await
            .unwrap();

        assert!(!submission.duplicate);
        assert_eq!(submission.proposals.len(), 1);
        assert_eq!(submission.proposals[0].policy_id, h.policy.id);
        assert!(submission.action.initiator_id.is_some());
    }

    #[tokio::test]
    async fn test_governed_message_is_taken_down_on_arrival() {
        let h = harness(FakeBroker::default()).await;
        let submission = h
            .governance
            .submit_action(&h.platform, post_message("hi"), "k1".to_string())
            .await
            .unwrap();

        assert!(submission.action.community_revert);
        assert_eq!(methods(&h.calls), ["chat.delete"]);
        let stored = h.governance.actions.get(submission.action.id).await.unwrap();
        assert!(stored.community_revert);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let h = harness(FakeBroker::default()).await;
        let first = h
            .governance
            .submit_action(&h.platform, post_message("hi"), "k1".to_string())
            .await
            .unwrap();
        let second = h
            .governance
            .submit_action(&h.platform, post_message("hi"), "k1".to_string())
            .await
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.action.id, first.action.id);
        assert_eq!(second.proposals.len(), 1);
        assert_eq!(h.governance.actions.list(None, None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_governable_action_without_policy_fails() {
        let h = harness(FakeBroker::default()).await;
        h.governance.policies.delete(h.policy.id).await.unwrap();
        let err = h
            .governance
            .submit_action(&h.platform, post_message("hi"), "k1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Policy(PolicyError::NoEligiblePolicy(_))));
    }

    #[tokio::test]
    async fn test_trigger_gets_proposal_per_listed_policy() {
        let h = harness(FakeBroker::default()).await;
        for name in ["Notify treasurer", "Log expenses"] {
            let mut policy = Policy::new(ActionKind::Trigger, name, Some(h.platform.community_id));
            policy.action_types = vec!["slack.reaction".to_string()];
            h.governance.policies.save(policy).await.unwrap();
        }

        let mut trigger = post_message("hi");
        trigger.kind = ActionKind::Trigger;
        trigger.action_type = "slack.reaction".to_string();
        let submission = h
            .governance
            .submit_action(&h.platform, trigger, "k2".to_string())
            .await
            .unwrap();
        assert_eq!(submission.proposals.len(), 2);
    }

    #[tokio::test]
    async fn test_bot_broker_events_ignored() {
        let h = harness(FakeBroker::default()).await;
        let event = BrokerEvent {
            community: "slack-t1".to_string(),
            source: "slack".to_string(),
            event_type: "message".to_string(),
            initiator: BrokerInitiator {
                user_id: "UBOT".to_string(),
                provider: "slack".to_string(),
                is_metagov_bot: true,
            },
            data: json!({}),
        };
        let result = h
            .governance
            .submit_broker_event(event, "k3".to_string())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
