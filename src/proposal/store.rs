//! Proposal storage
//!
//! Proposals and their votes. Status transitions and the dispatch claim are
//! checked under a single write lock.

use crate::action::ActionKind;
use crate::error::AppError;
use crate::governance::DispatchError;
use crate::metagov::ProcessStatus;
use crate::proposal::{
    BooleanVote, DispatchRecord, GovernanceProcess, NumberVote, Proposal, ProposalStatus, Tally,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Thread-safe proposal store
pub struct ProposalStore {
    proposals: Arc<RwLock<HashMap<Uuid, Proposal>>>,
    boolean_votes: Arc<RwLock<HashMap<Uuid, BooleanVote>>>,
    number_votes: Arc<RwLock<HashMap<Uuid, NumberVote>>>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self {
            proposals: Arc::new(RwLock::new(HashMap::new())),
            boolean_votes: Arc::new(RwLock::new(HashMap::new())),
            number_votes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn restore(
        &self,
        proposals: Vec<Proposal>,
        boolean_votes: Vec<BooleanVote>,
        number_votes: Vec<NumberVote>,
    ) {
        self.proposals
            .write()
            .await
            .extend(proposals.into_iter().map(|p| (p.id, p)));
        self.boolean_votes
            .write()
            .await
            .extend(boolean_votes.into_iter().map(|v| (v.id, v)));
        self.number_votes
            .write()
            .await
            .extend(number_votes.into_iter().map(|v| (v.id, v)));
    }

    /// Create a proposal. A governable action may have only one proposed
    /// proposal; a trigger action one per policy.
    pub async fn create(&self, proposal: Proposal, kind: ActionKind) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let clash = proposals.values().any(|p| {
            p.action_id == proposal.action_id
                && p.status == ProposalStatus::Proposed
                && (kind.is_governable() || p.policy_id == proposal.policy_id)
        });
        if clash {
            return Err(AppError::Conflict(format!(
                "Action {} already has an open proposal",
                proposal.action_id
            )));
        }

        proposals.insert(proposal.id, proposal.clone());
        debug!("Created proposal {} for action {}", proposal.id, proposal.action_id);
        Ok(proposal)
    }

    pub async fn get(&self, id: Uuid) -> Result<Proposal, AppError> {
        let proposals = self.proposals.read().await;
        proposals
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    /// List proposals, newest first
    pub async fn list(&self, action_id: Option<Uuid>, status: Option<ProposalStatus>) -> Vec<Proposal> {
        let proposals = self.proposals.read().await;
        let mut list: Vec<_> = proposals
            .values()
            .filter(|p| action_id.map_or(true, |id| p.action_id == id))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.proposal_time.cmp(&a.proposal_time));
        list
    }

    /// Proposed proposals waiting on a broker process
    pub async fn with_pending_process(&self) -> Vec<Proposal> {
        let proposals = self.proposals.read().await;
        proposals
            .values()
            .filter(|p| p.has_pending_process())
            .cloned()
            .collect()
    }

    /// Proposed proposals whose vote was posted at `post_id`
    pub async fn find_by_vote_post(&self, post_id: &str) -> Vec<Proposal> {
        let proposals = self.proposals.read().await;
        proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Proposed)
            .filter(|p| p.vote_post_id.as_deref() == Some(post_id))
            .cloned()
            .collect()
    }

    /// Store the process handle and vote locator together
    pub async fn attach_process(
        &self,
        id: Uuid,
        process: GovernanceProcess,
        vote_post_id: String,
    ) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;

        if proposal.status != ProposalStatus::Proposed {
            return Err(AppError::Conflict(format!("Proposal {} is already decided", id)));
        }
        if proposal.governance_process.is_some() {
            return Err(AppError::Conflict(format!(
                "Proposal {} already has a governance process",
                id
            )));
        }

        proposal.governance_process = Some(process);
        proposal.vote_post_id = Some(vote_post_id);
        proposal.updated_at = Utc::now();
        Ok(proposal.clone())
    }

    /// Record the latest broker view of the process
    pub async fn update_process(
        &self,
        id: Uuid,
        status: ProcessStatus,
        outcome: Option<Value>,
        errors: Option<Value>,
    ) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;
        let process = proposal.governance_process.as_mut().ok_or_else(|| {
            AppError::BadRequest(format!("Proposal {} has no governance process", id))
        })?;

        process.status = status;
        if outcome.is_some() {
            process.outcome = outcome;
        }
        if errors.is_some() {
            process.errors = errors;
        }
        proposal.updated_at = Utc::now();
        Ok(proposal.clone())
    }

    /// Move a proposed proposal to passed or failed
    pub async fn decide(&self, id: Uuid, status: ProposalStatus) -> Result<Proposal, AppError> {
        if status == ProposalStatus::Proposed {
            return Err(AppError::BadRequest("A decision must be passed or failed".to_string()));
        }

        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;

        if proposal.status != ProposalStatus::Proposed {
            return Err(AppError::Conflict(format!(
                "Proposal {} is already {:?}",
                id, proposal.status
            )));
        }

        let now = Utc::now();
        proposal.status = status;
        proposal.decided_at = Some(now);
        proposal.updated_at = now;
        info!("Proposal {} {:?}", id, status);
        Ok(proposal.clone())
    }

    /// Claim the single dispatch of a passed proposal
    pub async fn claim_dispatch(&self, id: Uuid) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;

        if proposal.status != ProposalStatus::Passed {
            return Err(DispatchError::NotPassed(id).into());
        }
        if proposal.dispatch.is_some() {
            return Err(DispatchError::AlreadyDispatched(id).into());
        }

        proposal.dispatch = Some(DispatchRecord::in_flight());
        proposal.updated_at = Utc::now();
        Ok(proposal.clone())
    }

    pub async fn finish_dispatch(&self, id: Uuid, record: DispatchRecord) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;
        proposal.dispatch = Some(record);
        proposal.updated_at = Utc::now();
        Ok(proposal.clone())
    }

    // =========================================================================
    // DATA STORE
    // =========================================================================

    pub async fn data_set(&self, id: Uuid, key: String, value: Value) -> Result<bool, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;
        proposal.updated_at = Utc::now();
        Ok(proposal.data.set(key, value))
    }

    pub async fn data_remove(&self, id: Uuid, key: &str) -> Result<bool, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;
        Ok(proposal.data.remove(key))
    }

    // =========================================================================
    // VOTES
    // =========================================================================

    /// Cast or replace a user's yes/no vote. Returns the vote and whether it is new.
    pub async fn cast_boolean_vote(
        &self,
        proposal_id: Uuid,
        user_id: Uuid,
        value: bool,
    ) -> Result<(BooleanVote, bool), AppError> {
        self.ensure_exists(proposal_id).await?;
        let mut votes = self.boolean_votes.write().await;
        let now = Utc::now();

        if let Some(vote) = votes
            .values_mut()
            .find(|v| v.proposal_id == proposal_id && v.user_id == user_id)
        {
            if vote.boolean_value != value {
                vote.boolean_value = value;
                vote.updated_at = now;
            }
            return Ok((vote.clone(), false));
        }

        let vote = BooleanVote {
            id: Uuid::new_v4(),
            proposal_id,
            user_id,
            boolean_value: value,
            created_at: now,
            updated_at: now,
        };
        votes.insert(vote.id, vote.clone());
        Ok((vote, true))
    }

    pub async fn cast_number_vote(
        &self,
        proposal_id: Uuid,
        user_id: Uuid,
        value: i64,
    ) -> Result<(NumberVote, bool), AppError> {
        self.ensure_exists(proposal_id).await?;
        let mut votes = self.number_votes.write().await;
        let now = Utc::now();

        if let Some(vote) = votes
            .values_mut()
            .find(|v| v.proposal_id == proposal_id && v.user_id == user_id)
        {
            vote.number_value = value;
            vote.updated_at = now;
            return Ok((vote.clone(), false));
        }

        let vote = NumberVote {
            id: Uuid::new_v4(),
            proposal_id,
            user_id,
            number_value: value,
            created_at: now,
            updated_at: now,
        };
        votes.insert(vote.id, vote.clone());
        Ok((vote, true))
    }

    /// Boolean votes on a proposal, optionally only `value` and only from `users`
    pub async fn boolean_votes(
        &self,
        proposal_id: Uuid,
        value: Option<bool>,
        users: Option<&[Uuid]>,
    ) -> Vec<BooleanVote> {
        let votes = self.boolean_votes.read().await;
        let mut list: Vec<_> = votes
            .values()
            .filter(|v| v.proposal_id == proposal_id)
            .filter(|v| value.map_or(true, |b| v.boolean_value == b))
            .filter(|v| users.map_or(true, |u| u.contains(&v.user_id)))
            .cloned()
            .collect();
        list.sort_by_key(|v| v.created_at);
        list
    }

    pub async fn yes_votes(&self, proposal_id: Uuid, users: Option<&[Uuid]>) -> Vec<BooleanVote> {
        self.boolean_votes(proposal_id, Some(true), users).await
    }

    pub async fn no_votes(&self, proposal_id: Uuid, users: Option<&[Uuid]>) -> Vec<BooleanVote> {
        self.boolean_votes(proposal_id, Some(false), users).await
    }

    /// Number votes on a proposal, optionally only `value` and only from `users`
    pub async fn number_votes(
        &self,
        proposal_id: Uuid,
        value: Option<i64>,
        users: Option<&[Uuid]>,
    ) -> Vec<NumberVote> {
        let votes = self.number_votes.read().await;
        let mut list: Vec<_> = votes
            .values()
            .filter(|v| v.proposal_id == proposal_id)
            .filter(|v| value.map_or(true, |n| v.number_value == n))
            .filter(|v| users.map_or(true, |u| u.contains(&v.user_id)))
            .cloned()
            .collect();
        list.sort_by_key(|v| v.created_at);
        list
    }

    pub async fn tally(&self, proposal_id: Uuid) -> Tally {
        let votes = self.boolean_votes.read().await;
        votes
            .values()
            .filter(|v| v.proposal_id == proposal_id)
            .fold(Tally::default(), |mut t, v| {
                if v.boolean_value {
                    t.yes += 1;
                } else {
                    t.no += 1;
                }
                t
            })
    }

    /// Total number of votes of either kind
    pub async fn count_votes(&self) -> usize {
        let boolean = self.boolean_votes.read().await.len();
        let number = self.number_votes.read().await.len();
        boolean + number
    }

    async fn ensure_exists(&self, id: Uuid) -> Result<(), AppError> {
        let proposals = self.proposals.read().await;
        if proposals.contains_key(&id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Proposal {} not found", id)))
        }
    }
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self::new()
    }
}
