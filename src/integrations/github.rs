//! GitHub adapter
//!
//! A GitHub App installation is one platform community. Votes run as issue
//! reaction votes in the broker.

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Platform};
use crate::integrations::{
    content, header_str, lookup, lookup_id, lookup_str, AuthStyle, ExecutionCall, Inbound,
    IntegrationError, NormalizedAction, PlatformAdapter, PlatformUser,
};
use axum::http::HeaderMap;
use reqwest::Method;
use serde_json::{json, Map, Value};

const TOKEN_AUTH: AuthStyle = AuthStyle::Header {
    name: "Authorization",
    prefix: "token ",
};

pub struct GithubAdapter;

impl GithubAdapter {
    fn issue_fields(payload: &Value) -> Map<String, Value> {
        content([
            ("repo_name", lookup(payload, "repository/full_name").cloned()),
            ("issue_number", lookup(payload, "issue/number").cloned()),
            ("title", lookup(payload, "issue/title").cloned()),
        ])
    }
}

impl PlatformAdapter for GithubAdapter {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    fn default_api_base(&self) -> &'static str {
        "https://api.github.com/"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["githubissuecomment"]
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "installation/id")
    }

    fn delivery_id(&self, headers: &HeaderMap, _payload: &Value) -> Option<String> {
        header_str(headers, "X-GitHub-Delivery").map(str::to_string)
    }

    fn normalize(
        &self,
        _platform: &CommunityPlatform,
        headers: &HeaderMap,
        payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        let event = header_str(headers, "X-GitHub-Event");
        let action = lookup_str(payload, "action");
        let sender = lookup_str(payload, "sender/login").map(PlatformUser::new);

        if lookup_str(payload, "sender/type") == Some("Bot") {
            return Ok(Inbound::Ignored("event from a bot account".to_string()));
        }

        let normalized = match (event, action) {
            (Some("issues"), Some(state @ ("opened" | "closed" | "reopened"))) => NormalizedAction {
                kind: ActionKind::Trigger,
                action_type: format!("githubissue{}", state),
                initiator: sender,
                content: Self::issue_fields(payload),
                community_origin: true,
            },
            (Some("issue_comment"), Some("created")) => {
                let mut fields = Self::issue_fields(payload);
                if let Some(body) = lookup(payload, "comment/body") {
                    fields.insert("body".to_string(), body.clone());
                }
                NormalizedAction {
                    kind: ActionKind::Platform,
                    action_type: "githubissuecomment".to_string(),
                    initiator: sender,
                    content: fields,
                    community_origin: true,
                }
            }
            _ => {
                return Ok(Inbound::Ignored(format!(
                    "unhandled event {:?}/{:?}",
                    event, action
                )))
            }
        };
        Ok(Inbound::Action(normalized))
    }

    fn execution_call(&self, action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        if action.action_type != "githubissuecomment" {
            return Err(self.unsupported("this action type"));
        }
        let repo = action
            .content_str("repo_name")
            .ok_or_else(|| IntegrationError::MissingField("repo_name".to_string()))?;
        let number = action
            .content
            .get("issue_number")
            .and_then(crate::integrations::value_to_id)
            .ok_or_else(|| IntegrationError::MissingField("issue_number".to_string()))?;
        let body = action
            .content
            .get("body")
            .cloned()
            .ok_or_else(|| IntegrationError::MissingField("body".to_string()))?;

        Ok(ExecutionCall::json(
            format!("repos/{}/issues/{}/comments", repo, number),
            Method::POST,
            Map::from_iter([("body".to_string(), body)]),
        )
        .with_auth(TOKEN_AUTH))
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("github.issue-react-vote")
    }

    fn vote_payload(
        &self,
        action: &GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let repo = target
            .or_else(|| action.content_str("repo_name"))
            .ok_or_else(|| IntegrationError::MissingField("repo_name".to_string()))?;
        Ok(content([("repo_name", Some(json!(repo)))]))
    }

    fn vote_post_key(&self) -> &'static str {
        "issue_number"
    }
}
