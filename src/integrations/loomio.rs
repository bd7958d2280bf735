//! Loomio polls
//!
//! Loomio is reached only through the broker's loomio plugin. Installs carry
//! the group's API key; votes are `loomio.poll` processes.

use crate::action::GovernableAction;
use crate::community::{Credentials, Platform};
use crate::integrations::{
    content, lookup_id, lookup_str, value_to_id, IntegrationError, OAuthGrant, OutcomeVotes, PlatformAdapter,
};
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Days a poll stays open
const POLL_DAYS: i64 = 3;

pub struct LoomioAdapter;

impl PlatformAdapter for LoomioAdapter {
    fn platform(&self) -> Platform {
        Platform::Loomio
    }

    fn default_api_base(&self) -> &'static str {
        ""
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "team_id")
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("loomio.poll")
    }

    /// A proposal poll; `target` names the subgroup to post it in
    fn vote_payload(
        &self,
        action: &GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let title = action
            .content
            .get("title")
            .cloned()
            .unwrap_or_else(|| json!(format!("Vote on {}", action.action_type)));
        let closing_at = (Utc::now() + Duration::days(POLL_DAYS)).format("%Y-%m-%d").to_string();
        Ok(content([
            ("title", Some(title)),
            ("details", action.content.get("text").cloned()),
            ("poll_type", Some(json!("proposal"))),
            ("options", Some(json!(["agree", "disagree", "abstain", "block"]))),
            ("closing_at", Some(json!(closing_at))),
            ("subgroup", target.map(|t| json!(t))),
        ]))
    }

    fn vote_post_key(&self) -> &'static str {
        "poll_url"
    }

    /// `agree` counts as yes, `disagree` and `block` as no. Abstentions are
    /// not votes.
    fn tally_votes(&self, outcome: &Value) -> OutcomeVotes {
        let mut votes = OutcomeVotes::default();
        let Some(options) = outcome.get("votes").and_then(Value::as_object) else {
            return votes;
        };
        for (option, result) in options {
            let value = match option.as_str() {
                "agree" | "yes" => true,
                "disagree" | "block" | "no" => false,
                _ => continue,
            };
            let users = result.get("users").and_then(Value::as_array).into_iter().flatten();
            votes
                .boolean
                .extend(users.filter_map(value_to_id).map(|user| (user, value)));
        }
        votes
    }

    /// Enable form: group key as `team_id`, its API key and a display name
    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        let team_id = lookup_id(payload, "team_id")
            .ok_or_else(|| IntegrationError::MissingField("team_id".to_string()))?;
        let api_key = lookup_str(payload, "api_key")
            .ok_or_else(|| IntegrationError::MissingField("api_key".to_string()))?;
        Ok(OAuthGrant {
            community_name: lookup_str(payload, "name")
                .map(str::to_string)
                .unwrap_or_else(|| team_id.clone()),
            team_id,
            credentials: Credentials {
                access_token: Some(api_key.to_string()),
                ..Default::default()
            },
            installer: None,
        })
    }
}
