//! Broker outcomes, platform reaction votes and decisions

use crate::action::{ActionKind, ActionStatus};
use crate::community::CommunityPlatform;
use crate::db::Table;
use crate::error::AppError;
use crate::governance::Governance;
use crate::integrations::ReactionVote;
use crate::metagov::{ProcessData, ProcessStatus};
use crate::proposal::{Proposal, ProposalStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Governance {
    /// Apply the latest broker view of a proposal's process: record votes and,
    /// once the process completed, decide the proposal.
    pub async fn handle_outcome(&self, proposal_id: Uuid, update: ProcessData) -> Result<Proposal, AppError> {
        let proposal = self.proposals.get(proposal_id).await?;
        if proposal.governance_process.is_none() {
            return Err(AppError::BadRequest(format!(
                "Proposal {} has no governance process",
                proposal_id
            )));
        }
        if proposal.status != ProposalStatus::Proposed {
            debug!("Ignoring outcome for decided proposal {}", proposal_id);
            return Ok(proposal);
        }

        let proposal = self
            .proposals
            .update_process(proposal_id, update.status, update.outcome.clone(), update.errors)
            .await?;
        self.db.save(Table::Proposals, proposal.id, &proposal).await;

        if let Some(outcome) = &update.outcome {
            let action = self.actions.get(proposal.action_id).await?;
            let platform = self.communities.get_platform(action.community_platform_id).await?;
            let tallied = self.adapters.get(platform.platform)?.tally_votes(outcome);

            for (username, value) in tallied.boolean {
                let user_id = self.voter(&platform, &username).await?;
                let (vote, _) = self
                    .proposals
                    .cast_boolean_vote(proposal_id, user_id, value)
                    .await?;
                self.db.save(Table::BooleanVotes, vote.id, &vote).await;
            }
            for (username, value) in tallied.number {
                let user_id = self.voter(&platform, &username).await?;
                let (vote, _) = self
                    .proposals
                    .cast_number_vote(proposal_id, user_id, value)
                    .await?;
                self.db.save(Table::NumberVotes, vote.id, &vote).await;
            }
        }

        if update.status == ProcessStatus::Completed {
            let tally = self.proposals.tally(proposal_id).await;
            info!(
                "Process for proposal {} completed: {} yes, {} no",
                proposal_id, tally.yes, tally.no
            );
            return match self.decide(proposal_id, tally.decision()).await {
                // A callback and the poller can both see the completed process
                Err(AppError::Conflict(_)) => {
                    debug!("Proposal {} was decided concurrently", proposal_id);
                    self.proposals.get(proposal_id).await
                }
                result => result,
            };
        }
        Ok(proposal)
    }

    /// Record a vote cast directly on a platform post. Returns the proposals
    /// the vote applied to.
    pub async fn handle_reaction_vote(
        &self,
        platform: &CommunityPlatform,
        vote: ReactionVote,
    ) -> Result<Vec<Proposal>, AppError> {
        let mut applied = Vec::new();
        for proposal in self.proposals.find_by_vote_post(&vote.post_id).await {
            let action = self.actions.get(proposal.action_id).await?;
            if action.community_platform_id != platform.id {
                continue;
            }
            let (user, created) = self
                .communities
                .get_or_create_user(platform.id, &vote.voter.username, vote.voter.readable_name.as_deref())
                .await?;
            if created {
                self.db.save(Table::CommunityUsers, user.id, &user).await;
            }
            let (cast, _) = self
                .proposals
                .cast_boolean_vote(proposal.id, user.id, vote.value)
                .await?;
            self.db.save(Table::BooleanVotes, cast.id, &cast).await;
            debug!(
                "Recorded {} vote by {} on proposal {}",
                vote.value, user.username, proposal.id
            );
            applied.push(proposal);
        }
        Ok(applied)
    }

    /// Pass or fail a proposal. A pass dispatches the action in the
    /// background; a fail rejects it and takes a still-live community action
    /// off the platform.
    pub async fn decide(&self, proposal_id: Uuid, status: ProposalStatus) -> Result<Proposal, AppError> {
        let proposal = self.proposals.decide(proposal_id, status).await?;
        self.db.save(Table::Proposals, proposal.id, &proposal).await;

        let action = self.actions.get(proposal.action_id).await?;
        if action.kind == ActionKind::Trigger {
            // Trigger actions are observations; nothing to execute or reject
            return Ok(proposal);
        }

        match status {
            ProposalStatus::Passed => {
                let governance = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = governance.execute_proposal(proposal_id).await {
                        warn!("Dispatch of proposal {} failed: {}", proposal_id, e);
                    }
                });
            }
            ProposalStatus::Failed => {
                let action = self.actions.set_status(action.id, ActionStatus::Rejected).await?;
                self.db.save(Table::Actions, action.id, &action).await;
                info!("Action {} rejected", action.id);

                if action.community_origin && !action.community_revert {
                    let platform = self.communities.get_platform(action.community_platform_id).await?;
                    let governance = self.clone();
                    tokio::spawn(async move {
                        governance.revert_action(&platform, &action).await;
                    });
                }
            }
            ProposalStatus::Proposed => {}
        }
        Ok(proposal)
    }

    /// Close the broker process early and apply its final outcome
    pub async fn close_process(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        let (slug, location) = self.process_location(proposal_id).await?;
        let data = self.broker.close_process(&slug, &location).await?;
        self.handle_outcome(proposal_id, data).await
    }

    /// Fetch the broker's current view of the process and apply it
    pub async fn refresh_process(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        let (slug, location) = self.process_location(proposal_id).await?;
        let data = self.broker.get_process(&slug, &location).await?;
        self.handle_outcome(proposal_id, data).await
    }

    async fn process_location(&self, proposal_id: Uuid) -> Result<(String, String), AppError> {
        let proposal = self.proposals.get(proposal_id).await?;
        let location = proposal
            .governance_process
            .map(|p| p.location)
            .ok_or_else(|| {
                AppError::BadRequest(format!("Proposal {} has no governance process", proposal_id))
            })?;
        let action = self.actions.get(proposal.action_id).await?;
        let platform = self.communities.get_platform(action.community_platform_id).await?;
        Ok((self.broker_slug(&platform).await?, location))
    }

    async fn voter(&self, platform: &CommunityPlatform, username: &str) -> Result<Uuid, AppError> {
        let (user, created) = self
            .communities
            .get_or_create_user(platform.id, username, Some(username))
            .await?;
        if created {
            self.db.save(Table::CommunityUsers, user.id, &user).await;
        }
        Ok(user.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::{harness, methods, post_message, settled, votes};
    use crate::integrations::PlatformUser;
    use crate::metagov::fake::{pending, FakeBroker};
    use crate::proposal::DispatchState;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn voting(broker: FakeBroker) -> (crate::governance::testing::Harness, Uuid) {
        let h = harness(broker).await;
        let submission = h
            .governance
            .submit_action(&h.platform, post_message("hello"), "k1".to_string())
            .await
            .unwrap();
        let id = submission.proposals[0].id;
        h.governance.initiate_vote(id, None, None).await.unwrap();
        (h, id)
    }

    fn completed(outcome: serde_json::Value) -> ProcessData {
        ProcessData {
            location: "/api/internal/process/slack.emoji-vote/1".to_string(),
            status: ProcessStatus::Completed,
            outcome: Some(outcome),
            errors: None,
        }
    }

    #[tokio::test]
    async fn test_pending_outcome_records_votes() {
        let (h, id) = voting(FakeBroker::with_process(pending("slack.emoji-vote", votes(&[], &[])))).await;
        let update = pending("slack.emoji-vote", votes(&["U1", "U2"], &["U3"]));

        let proposal = h.governance.handle_outcome(id, update).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Proposed);
        assert_eq!(h.governance.proposals.tally(id).await.yes, 2);
        assert_eq!(h.governance.proposals.no_votes(id, None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_completed_pass_dispatches_once() {
        let (h, id) = voting(FakeBroker::with_process(pending("slack.emoji-vote", votes(&[], &[])))).await;

        let proposal = h
            .governance
            .handle_outcome(id, completed(votes(&["U1", "U2"], &["U3"])))
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Passed);
        let proposal = settled(&h.governance, id).await;
        assert_eq!(proposal.dispatch.unwrap().state, DispatchState::Succeeded);

        // the message was taken down on arrival and re-posted on pass
        assert_eq!(methods(&h.calls), ["chat.delete", "chat.postMessage"]);
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls[1]["text"], "hello");
        assert_eq!(calls[1]["token"], "xoxb-bot");

        let action = h.governance.actions.get(proposal.action_id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Executed);

        // a late callback changes nothing
        let again = h
            .governance
            .handle_outcome(id, completed(votes(&["U1", "U2"], &["U3"])))
            .await
            .unwrap();
        assert_eq!(again.status, ProposalStatus::Passed);
        assert_eq!(h.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreverted_action_is_not_posted_twice() {
        let h = harness(FakeBroker::default()).await;
        let mut message = post_message("hello");
        message.content.remove("timestamp");
        let submission = h
            .governance
            .submit_action(&h.platform, message, "k1".to_string())
            .await
            .unwrap();
        assert!(!submission.action.community_revert);
        let id = submission.proposals[0].id;

        h.governance.decide(id, ProposalStatus::Passed).await.unwrap();
        let proposal = settled(&h.governance, id).await;
        assert_eq!(proposal.dispatch.unwrap().state, DispatchState::Succeeded);
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_vote_reverts_live_action() {
        let h = harness(FakeBroker::default()).await;
        let draft = crate::action::ActionDraft {
            initiator_id: None,
            kind: ActionKind::Platform,
            action_type: "slackpostmessage".to_string(),
            content: post_message("hello").content,
            community_origin: true,
        };
        let action = h
            .governance
            .actions
            .ingest(h.platform.id, draft, "k1".to_string())
            .await
            .action()
            .clone();
        let proposals = h.governance.propose(&h.platform, &action).await.unwrap();

        h.governance.decide(proposals[0].id, ProposalStatus::Failed).await.unwrap();
        for _ in 0..200 {
            if h.governance.actions.get(action.id).await.unwrap().community_revert {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let action = h.governance.actions.get(action.id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Rejected);
        assert!(action.community_revert);
        assert_eq!(methods(&h.calls), ["chat.delete"]);
        assert_eq!(h.calls.lock().unwrap()[0]["ts"], "1.1");
    }

    #[tokio::test]
    async fn test_concurrent_completion_is_a_no_op() {
        let (h, id) = voting(FakeBroker::with_process(pending("slack.emoji-vote", votes(&[], &[])))).await;
        let outcome = votes(&["U1"], &[]);

        let (first, second) = tokio::join!(
            h.governance.handle_outcome(id, completed(outcome.clone())),
            h.governance.handle_outcome(id, completed(outcome.clone())),
        );
        assert_eq!(first.unwrap().status, ProposalStatus::Passed);
        assert_eq!(second.unwrap().status, ProposalStatus::Passed);

        settled(&h.governance, id).await;
        assert_eq!(methods(&h.calls), ["chat.delete", "chat.postMessage"]);
    }

    #[tokio::test]
    async fn test_tie_fails_and_rejects_action() {
        let (h, id) = voting(FakeBroker::with_process(pending("slack.emoji-vote", votes(&[], &[])))).await;
        let proposal = h
            .governance
            .handle_outcome(id, completed(votes(&["U1"], &["U2"])))
            .await
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::Failed);
        assert!(proposal.dispatch.is_none());
        let action = h.governance.actions.get(proposal.action_id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Rejected);
        // only the revert on arrival; nothing is re-posted
        assert_eq!(methods(&h.calls), ["chat.delete"]);
    }

    #[tokio::test]
    async fn test_reaction_vote_targets_vote_post() {
        let (h, id) = voting(FakeBroker::with_process(pending("slack.emoji-vote", votes(&[], &[])))).await;
        let applied = h
            .governance
            .handle_reaction_vote(
                &h.platform,
                ReactionVote {
                    post_id: "99.1".to_string(),
                    voter: PlatformUser::new("U9"),
                    value: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(h.governance.proposals.yes_votes(id, None).await.len(), 1);

        let unrelated = h
            .governance
            .handle_reaction_vote(
                &h.platform,
                ReactionVote {
                    post_id: "1.0".to_string(),
                    voter: PlatformUser::new("U9"),
                    value: false,
                },
            )
            .await
            .unwrap();
        assert!(unrelated.is_empty());
    }

    #[tokio::test]
    async fn test_close_process_decides() {
        let (h, id) = voting(FakeBroker::with_process(pending(
            "slack.emoji-vote",
            json!({"votes": {"yes": {"users": ["U1"]}, "no": {"users": []}}, "message_ts": "99.1"}),
        )))
        .await;

        let proposal = h.governance.close_process(id).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Passed);
        assert!(h
            .broker
            .calls()
            .iter()
            .any(|c| c.starts_with("close slack-t1 /api/internal/process/slack.emoji-vote/1")));
    }

    #[tokio::test]
    async fn test_loomio_poll_decides_proposal() {
        let broker = FakeBroker::with_process(pending(
            "loomio.poll",
            json!({"poll_url": "https://www.loomio.org/p/abc", "votes": {}}),
        ));
        let h = harness(broker).await;
        let loomio = h
            .governance
            .communities
            .install(crate::community::NewInstallation {
                platform: crate::community::Platform::Loomio,
                team_id: "acme-group".to_string(),
                community_name: "Acme".to_string(),
                api_base: String::new(),
                credentials: Default::default(),
                community_id: Some(h.platform.community_id),
            })
            .await
            .unwrap()
            .platform;
        let draft = crate::action::ActionDraft {
            initiator_id: None,
            kind: ActionKind::Platform,
            action_type: "loomio.new_discussion".to_string(),
            content: json!({"title": "Adopt the charter"}).as_object().cloned().unwrap(),
            community_origin: true,
        };
        let action = h
            .governance
            .actions
            .ingest(loomio.id, draft, "l1".to_string())
            .await
            .action()
            .clone();
        let id = h.governance.propose(&loomio, &action).await.unwrap()[0].id;

        let proposal = h.governance.initiate_vote(id, None, None).await.unwrap();
        assert_eq!(proposal.vote_post_id.as_deref(), Some("https://www.loomio.org/p/abc"));
        assert!(h.broker.calls()[0].starts_with("start slack-t1 loomio.poll"));

        let outcome = json!({"votes": {
            "agree": {"users": ["ada", "bob"]},
            "disagree": {"users": ["cy"]},
            "abstain": {"users": ["dee"]}
        }});
        let mut update = completed(outcome);
        update.location = "/api/internal/process/loomio.poll/1".to_string();
        let proposal = h.governance.handle_outcome(id, update).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Passed);
        assert_eq!(h.governance.proposals.tally(id).await.yes, 2);
        assert_eq!(h.governance.proposals.no_votes(id, None).await.len(), 1);
    }
}
