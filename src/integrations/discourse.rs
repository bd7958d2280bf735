//! Discourse adapter
//!
//! The forum URL is the team id and API base. Calls are form posts carrying
//! a `User-Api-Key` header.

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Credentials, Platform};
use crate::integrations::{
    content, header_str, lookup, lookup_str, pick, value_to_id, AuthStyle, ExecutionCall, Inbound,
    IntegrationError, NormalizedAction, OAuthGrant, PlatformAdapter, PlatformUser, TokenScope,
};
use axum::http::HeaderMap;
use reqwest::Method;
use serde_json::{json, Map, Value};

const USER_API_KEY: AuthStyle = AuthStyle::Header {
    name: "User-Api-Key",
    prefix: "",
};

pub struct DiscourseAdapter;

impl PlatformAdapter for DiscourseAdapter {
    fn platform(&self) -> Platform {
        Platform::Discourse
    }

    fn default_api_base(&self) -> &'static str {
        ""
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["discoursecreatetopic", "discoursecreatepost"]
    }

    fn team_id(&self, headers: &HeaderMap, _payload: &Value) -> Option<String> {
        header_str(headers, "X-Discourse-Instance").map(|url| url.trim_end_matches('/').to_string())
    }

    fn delivery_id(&self, headers: &HeaderMap, _payload: &Value) -> Option<String> {
        header_str(headers, "X-Discourse-Event-Id").map(str::to_string)
    }

    fn normalize(
        &self,
        _platform: &CommunityPlatform,
        headers: &HeaderMap,
        payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        let (action_type, fields, username) = match header_str(headers, "X-Discourse-Event") {
            Some("topic_created") => (
                "discoursecreatetopic",
                content([
                    ("title", lookup(payload, "topic/title").cloned()),
                    ("topic_id", lookup(payload, "topic/id").cloned()),
                    ("category", lookup(payload, "topic/category_id").cloned()),
                ]),
                lookup_str(payload, "topic/created_by/username"),
            ),
            Some("post_created") => (
                "discoursecreatepost",
                content([
                    ("raw", lookup(payload, "post/raw").cloned()),
                    ("topic_id", lookup(payload, "post/topic_id").cloned()),
                    ("post_id", lookup(payload, "post/id").cloned()),
                ]),
                lookup_str(payload, "post/username"),
            ),
            other => return Ok(Inbound::Ignored(format!("unhandled event {:?}", other))),
        };

        Ok(Inbound::Action(NormalizedAction {
            kind: ActionKind::Platform,
            action_type: action_type.to_string(),
            initiator: username.map(PlatformUser::new),
            content: fields,
            community_origin: true,
        }))
    }

    fn execution_call(&self, action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        let params = match action.action_type.as_str() {
            "discoursecreatetopic" => {
                let mut params = pick(action, &["title", "raw"])?;
                if let Some(category) = action.content.get("category") {
                    params.insert("category".to_string(), category.clone());
                }
                params
            }
            "discoursecreatepost" => pick(action, &["topic_id", "raw"])?,
            _ => return Err(self.unsupported("this action type")),
        };
        Ok(ExecutionCall::form("/posts.json", params).with_auth(USER_API_KEY))
    }

    fn revert_call(&self, action: &GovernableAction) -> Option<ExecutionCall> {
        let path = match action.action_type.as_str() {
            "discoursecreatetopic" => format!("/t/{}.json", action.content.get("topic_id").and_then(value_to_id)?),
            "discoursecreatepost" => format!("/posts/{}.json", action.content.get("post_id").and_then(value_to_id)?),
            _ => return None,
        };
        Some(
            ExecutionCall::json(path, Method::DELETE, Map::new())
                .with_auth(USER_API_KEY)
                .with_token(TokenScope::AdminUser),
        )
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("discourse.poll")
    }

    fn vote_payload(
        &self,
        action: &GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let topic = target
            .map(|t| json!(t))
            .or_else(|| action.content.get("topic_id").cloned());
        Ok(content([
            ("topic_id", topic),
            ("options", Some(json!(["yes", "no"]))),
        ]))
    }

    fn vote_post_key(&self) -> &'static str {
        "post_id"
    }

    /// `init_community_discourse` form: forum url, user api key, name
    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        let team_id = lookup_str(payload, "team_id")
            .or_else(|| lookup_str(payload, "url"))
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| IntegrationError::MissingField("team_id".to_string()))?;
        let api_key = lookup_str(payload, "api_key")
            .ok_or_else(|| IntegrationError::MissingField("api_key".to_string()))?;

        Ok(OAuthGrant {
            community_name: lookup_str(payload, "community_name")
                .or_else(|| lookup_str(payload, "name"))
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
