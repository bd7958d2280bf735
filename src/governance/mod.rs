//! Governance hand-off
//!
//! Takes normalized actions from ingress to a decision: proposal creation,
//! broker votes, outcome handling and the single dispatch of a passed action.

mod constitution;
mod dispatcher;
mod evaluation;
mod install;
mod outcome;
mod vote;

pub use constitution::CONSTITUTION_ACTIONS;
pub use dispatcher::Dispatcher;
pub use evaluation::Submission;
pub use install::{GrantSource, InstallReport};

use crate::action::ActionStore;
use crate::community::{Community, CommunityPlatform, CommunityStore};
use crate::db::{Snapshot, WriteThrough};
use crate::error::AppError;
use crate::integrations::AdapterRegistry;
use crate::metagov::GovernanceBroker;
use crate::policy::PolicyStore;
use crate::proposal::ProposalStore;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("proposal {0} has not passed")]
    NotPassed(Uuid),

    #[error("proposal {0} was already dispatched")]
    AlreadyDispatched(Uuid),

    #[error("{0} actions are not executable")]
    NotExecutable(String),

    #[error("platform rejected the call with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("dispatch failed: {0}")]
    Failed(String),
}

/// Shared governance service
#[derive(Clone)]
pub struct Governance {
    pub communities: Arc<CommunityStore>,
    pub actions: Arc<ActionStore>,
    pub policies: Arc<PolicyStore>,
    pub proposals: Arc<ProposalStore>,
    pub adapters: AdapterRegistry,
    pub broker: Arc<dyn GovernanceBroker>,
    pub dispatcher: Dispatcher,
    pub db: WriteThrough,
    public_url: String,
}

impl Governance {
    pub fn new(
        adapters: AdapterRegistry,
        broker: Arc<dyn GovernanceBroker>,
        dispatcher: Dispatcher,
        db: WriteThrough,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            communities: Arc::new(CommunityStore::new()),
            actions: Arc::new(ActionStore::new()),
            policies: Arc::new(PolicyStore::new()),
            proposals: Arc::new(ProposalStore::new()),
            adapters,
            broker,
            dispatcher,
            db,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Load persisted records into the in-memory stores
    pub async fn restore(&self, snapshot: Snapshot) {
        self.communities
            .restore(snapshot.communities, snapshot.platforms, snapshot.users)
            .await;
        self.actions.restore(snapshot.actions).await;
        self.policies.restore(snapshot.policies).await;
        self.proposals
            .restore(snapshot.proposals, snapshot.boolean_votes, snapshot.number_votes)
            .await;
    }

    /// Broker callback URL for a proposal's process
    pub fn callback_url(&self, proposal_id: Uuid) -> String {
        format!("{}/metagov/internal/outcome/{}", self.public_url, proposal_id)
    }

    /// Broker slug of the community owning `platform`
    pub(crate) async fn broker_slug(&self, platform: &CommunityPlatform) -> Result<String, AppError> {
        let community: Community = self.communities.get_community(platform.community_id).await?;
        community.metagov_slug.ok_or_else(|| {
            AppError::BadRequest(format!(
                "Community {} is not registered with the governance broker",
                community.id
            ))
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared harness: a Slack installation, a base policy and a fake platform API

    use super::*;
    use crate::action::ActionKind;
    use crate::community::{Credentials, NewInstallation, Platform};
    use crate::config::DispatchConfig;
    use crate::metagov::fake::FakeBroker;
    use crate::policy::Policy;
    use crate::proposal::{DispatchState, Proposal};
    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub type Calls = Arc<Mutex<Vec<HashMap<String, String>>>>;

    pub struct Harness {
        pub governance: Governance,
        pub broker: Arc<FakeBroker>,
        pub platform: CommunityPlatform,
        pub policy: Policy,
        pub calls: Calls,
    }

    /// Fake Slack Web API that records form bodies, with the called method
    /// under `method`
    pub async fn spawn_platform() -> (String, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/{method}",
                post(
                    |State(calls): State<Calls>,
                     Path(method): Path<String>,
                     Form(mut body): Form<HashMap<String, String>>| async move {
                        body.insert("method".to_string(), method);
                        calls.lock().unwrap().push(body);
                        Json(json!({"ok": true}))
                    },
                ),
            )
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/", addr), calls)
    }

    pub async fn harness(broker: FakeBroker) -> Harness {
        let broker = Arc::new(broker);
        let (api_base, calls) = spawn_platform().await;
        let dispatcher = Dispatcher::new(DispatchConfig {
            max_attempts: 2,
            backoff_ms: 1,
            timeout_secs: 5,
        })
        .unwrap();
        let governance = Governance::new(
            AdapterRegistry::with_defaults(),
            broker.clone(),
            dispatcher,
            WriteThrough::default(),
            "http://policykit.test/",
        );

        let installation = governance
            .communities
            .install(NewInstallation {
                platform: Platform::Slack,
                team_id: "T1".to_string(),
                community_name: "Acme".to_string(),
                api_base,
                credentials: Credentials {
                    access_token: Some("xoxb-bot".to_string()),
                    bot_id: Some("UBOT".to_string()),
                    refresh_token: None,
                },
                community_id: None,
            })
            .await
            .unwrap();
        governance
            .communities
            .set_metagov_slug(installation.community.id, "slack-t1".to_string())
            .await
            .unwrap();

        let policy = governance
            .policies
            .save(Policy::new(
                ActionKind::Platform,
                "All posts need a vote",
                Some(installation.community.id),
            ))
            .await
            .unwrap();

        Harness {
            governance,
            broker,
            platform: installation.platform,
            policy,
            calls,
        }
    }

    pub fn post_message(text: &str) -> crate::integrations::NormalizedAction {
        crate::integrations::NormalizedAction {
            kind: ActionKind::Platform,
            action_type: "slackpostmessage".to_string(),
            initiator: Some(crate::integrations::PlatformUser::new("U1")),
            content: json!({"text": text, "channel": "C1", "timestamp": "1.1"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            community_origin: true,
        }
    }

    /// Methods called on the fake platform API, in order
    pub fn methods(calls: &Calls) -> Vec<String> {
        calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.get("method").cloned().unwrap_or_default())
            .collect()
    }

    /// Wait for the background dispatch of a passed proposal to settle
    pub async fn settled(governance: &Governance, proposal_id: Uuid) -> Proposal {
        for _ in 0..200 {
            let proposal = governance.proposals.get(proposal_id).await.unwrap();
            let action = governance.actions.get(proposal.action_id).await.unwrap();
            let finished = match &proposal.dispatch {
                Some(d) if d.state == DispatchState::Failed => true,
                Some(d) => d.finished_at.is_some() && action.status.is_terminal(),
                None => false,
            };
            if finished {
                return proposal;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("proposal {} never finished dispatching", proposal_id);
    }

    pub fn votes(yes: &[&str], no: &[&str]) -> Value {
        json!({"votes": {"yes": {"users": yes}, "no": {"users": no}}, "message_ts": "99.1"})
    }
}
