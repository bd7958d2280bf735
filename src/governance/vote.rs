//! Vote initiation through the governance broker

use crate::db::Table;
use crate::error::AppError;
use crate::governance::Governance;
use crate::metagov::MetagovError;
use crate::policy::Policy;
use crate::proposal::{GovernanceProcess, Proposal, ProposalStatus};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// Question posted when a vote is started without one
fn default_vote_message(policy: &Policy) -> String {
    format!(
        "This action is governed by the following policy: {}. \
         Vote with :thumbsup: or :thumbsdown: on this post.",
        policy.name
    )
}

impl Governance {
    /// Start a broker vote for a proposal. `target` overrides where the vote
    /// is posted (a channel, repository or topic). Nothing is stored unless
    /// the broker started the process and reported where the vote lives.
    pub async fn initiate_vote(
        &self,
        proposal_id: Uuid,
        target: Option<&str>,
        question: Option<&str>,
    ) -> Result<Proposal, AppError> {
        let proposal = self.proposals.get(proposal_id).await?;
        if proposal.status != ProposalStatus::Proposed {
            return Err(AppError::Conflict(format!(
                "Proposal {} is already decided",
                proposal_id
            )));
        }
        if proposal.governance_process.is_some() {
            return Err(AppError::Conflict(format!(
                "Proposal {} already has a governance process",
                proposal_id
            )));
        }

        let action = self.actions.get(proposal.action_id).await?;
        let platform = self.communities.get_platform(action.community_platform_id).await?;
        let adapter = self.adapters.get(platform.platform)?;
        let process_type = adapter
            .vote_process()
            .ok_or_else(|| adapter.unsupported("voting"))?;
        let policy = self.policies.get(proposal.policy_id).await?;

        let mut payload = adapter.vote_payload(&action, target)?;
        payload.insert(
            "question".to_string(),
            json!(question
                .map(str::to_string)
                .unwrap_or_else(|| default_vote_message(&policy))),
        );
        payload.insert("callback_url".to_string(), json!(self.callback_url(proposal_id)));

        let slug = self.broker_slug(&platform).await?;
        let process = self
            .broker
            .start_process(&slug, process_type, Value::Object(payload))
            .await?;

        let Some(vote_post_id) = process
            .outcome
            .as_ref()
            .and_then(|outcome| adapter.vote_post_id(outcome))
        else {
            self.close_orphan(&slug, &process.location).await;
            return Err(MetagovError::InvalidResponse(format!(
                "{} process outcome has no '{}'",
                process_type,
                adapter.vote_post_key()
            ))
            .into());
        };

        let handle = GovernanceProcess {
            process_type: process_type.to_string(),
            location: process.location.clone(),
            status: process.status,
            outcome: process.outcome.clone(),
            errors: process.errors.clone(),
        };
        let proposal = match self
            .proposals
            .attach_process(proposal_id, handle, vote_post_id)
            .await
        {
            Ok(proposal) => proposal,
            Err(e) => {
                // Lost a race with another start or a decision
                self.close_orphan(&slug, &process.location).await;
                return Err(e);
            }
        };

        self.db.save(Table::Proposals, proposal.id, &proposal).await;
        info!(
            "Started {} vote for proposal {} at {}",
            process_type, proposal_id, process.location
        );
        Ok(proposal)
    }

    /// Close a process that no proposal will track
    async fn close_orphan(&self, slug: &str, location: &str) {
        if let Err(e) = self.broker.close_process(slug, location).await {
            warn!("Failed to close orphaned process {}: {}", location, e);
        }
    }
}
