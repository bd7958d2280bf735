//! Proposal data models
//!
//! A proposal wraps one governable action under one policy, together with the
//! broker process handle, votes and a small key/value store.

use crate::metagov::ProcessStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Proposal status in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Waiting for a decision
    Proposed,
    /// Passed; the action may be dispatched
    Passed,
    /// Failed; the action is rejected
    Failed,
}

impl Default for ProposalStatus {
    fn default() -> Self {
        ProposalStatus::Proposed
    }
}

/// Handle to a process running in the governance broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceProcess {
    /// Process type, e.g. `github.issue-react-vote`
    pub process_type: String,
    /// Broker location of the process resource
    pub location: String,
    pub status: ProcessStatus,
    pub outcome: Option<Value>,
    pub errors: Option<Value>,
}

/// Serializable data persisted on a proposal
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DataStore(Map<String, Value>);

impl DataStore {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Store `value` under `key`. Always succeeds.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> bool {
        self.0.insert(key.into(), value);
        true
    }

    /// Remove `key`, reporting whether it was present
    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Result of sending the action to the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub state: DispatchState,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    InFlight,
    Succeeded,
    Failed,
}

impl DispatchRecord {
    pub fn in_flight() -> Self {
        Self {
            state: DispatchState::InFlight,
            attempts: 0,
            status_code: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub action_id: Uuid,
    pub policy_id: Uuid,
    pub status: ProposalStatus,
    pub governance_process: Option<GovernanceProcess>,
    /// Platform locator of the vote post (e.g. a GitHub issue number)
    pub vote_post_id: Option<String>,
    pub data: DataStore,
    pub dispatch: Option<DispatchRecord>,
    pub proposal_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn new(action_id: Uuid, policy_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            action_id,
            policy_id,
            status: ProposalStatus::Proposed,
            governance_process: None,
            vote_post_id: None,
            data: DataStore::default(),
            dispatch: None,
            proposal_time: now,
            updated_at: now,
            decided_at: None,
        }
    }

    pub fn has_pending_process(&self) -> bool {
        self.status == ProposalStatus::Proposed
            && self
                .governance_process
                .as_ref()
                .is_some_and(|p| p.status.is_open())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanVote {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub user_id: Uuid,
    pub boolean_value: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberVote {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub user_id: Uuid,
    pub number_value: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Yes/no totals for a proposal
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Tally {
    pub yes: usize,
    pub no: usize,
}

impl Tally {
    /// A completed process passes on a strict yes majority
    pub fn decision(&self) -> ProposalStatus {
        if self.yes > self.no {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datastore_semantics() {
        let mut data = DataStore::default();
        assert!(data.get("missing").is_none());
        assert!(data.set("count", json!(3)));
        assert_eq!(data.get("count"), Some(&json!(3)));
        assert!(data.set("count", json!(4)));
        assert_eq!(data.get("count"), Some(&json!(4)));
        assert!(data.remove("count"));
        assert!(!data.remove("count"));
    }

    #[test]
    fn test_tie_fails() {
        assert_eq!(Tally { yes: 2, no: 1 }.decision(), ProposalStatus::Passed);
        assert_eq!(Tally { yes: 1, no: 1 }.decision(), ProposalStatus::Failed);
        assert_eq!(Tally::default().decision(), ProposalStatus::Failed);
    }
}
