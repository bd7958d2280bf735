//! Reddit adapter
//!
//! A subreddit is one platform community. Posts are submitted through the
//! OAuth API with a bearer token.

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Credentials, Platform};
use crate::integrations::{
    content, lookup_str, AuthStyle, ExecutionCall, Inbound, Installer, IntegrationError,
    NormalizedAction, OAuthGrant, PlatformAdapter, PlatformUser, TokenScope,
};
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

const BEARER: AuthStyle = AuthStyle::Header {
    name: "Authorization",
    prefix: "bearer ",
};

pub struct RedditAdapter;

impl PlatformAdapter for RedditAdapter {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    fn default_api_base(&self) -> &'static str {
        "https://oauth.reddit.com/"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["redditmakepost"]
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_str(payload, "data/subreddit").map(str::to_string)
    }

    fn delivery_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_str(payload, "data/name").map(str::to_string)
    }

    /// A listing child of kind `t3` (link/self post)
    fn normalize(
        &self,
        _platform: &CommunityPlatform,
        _headers: &HeaderMap,
        payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        if lookup_str(payload, "kind") != Some("t3") {
            return Ok(Inbound::Ignored("not a post".to_string()));
        }
        let data = payload
            .get("data")
            .ok_or_else(|| IntegrationError::MissingField("data".to_string()))?;
        let kind = if data.get("is_self").and_then(Value::as_bool) == Some(false) {
            "link"
        } else {
            "self"
        };

        Ok(Inbound::Action(NormalizedAction {
            kind: ActionKind::Platform,
            action_type: "redditmakepost".to_string(),
            initiator: lookup_str(data, "author").map(PlatformUser::new),
            content: content([
                ("title", data.get("title").cloned()),
                ("text", data.get("selftext").cloned()),
                ("kind", Some(json!(kind))),
                ("name", data.get("name").cloned()),
            ]),
            community_origin: true,
        }))
    }

    fn execution_call(&self, action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        if action.action_type != "redditmakepost" {
            return Err(self.unsupported("this action type"));
        }
        let title = action
            .content
            .get("title")
            .cloned()
            .ok_or_else(|| IntegrationError::MissingField("title".to_string()))?;
        let params = content([
            ("title", Some(title)),
            ("text", action.content.get("text").cloned()),
            (
                "kind",
                Some(action.content.get("kind").cloned().unwrap_or_else(|| json!("self"))),
            ),
            ("sr", action.content.get("sr").cloned()),
            ("api_type", Some(json!("json"))),
        ]);
        Ok(ExecutionCall::form("api/submit", params)
            .with_auth(BEARER)
            .with_token(TokenScope::User))
    }

    /// Moderator removal of the submitted post
    fn revert_call(&self, action: &GovernableAction) -> Option<ExecutionCall> {
        if action.action_type != "redditmakepost" {
            return None;
        }
        let name = action.content.get("name").filter(|v| !v.is_null())?.clone();
        let params = Map::from_iter([("id".to_string(), name), ("spam".to_string(), json!(false))]);
        Some(
            ExecutionCall::form("api/remove", params)
                .with_auth(BEARER)
                .with_token(TokenScope::AdminUser),
        )
    }

    /// Submissions go to the installed subreddit unless one was given
    fn prepare_call(&self, mut call: ExecutionCall, platform: &CommunityPlatform) -> ExecutionCall {
        call.params
            .entry("sr")
            .or_insert_with(|| json!(platform.community_name));
        call
    }

    /// `init_community_reddit`: subreddit title plus OAuth tokens
    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        let title = lookup_str(payload, "title")
            .or_else(|| lookup_str(payload, "team_id"))
            .ok_or_else(|| IntegrationError::MissingField("title".to_string()))?;
        let access_token = lookup_str(payload, "access_token").map(str::to_string);

        Ok(OAuthGrant {
            team_id: title.to_string(),
            community_name: title.to_string(),
            installer: lookup_str(payload, "username").map(|name| Installer {
                username: name.to_string(),
                readable_name: Some(name.to_string()),
                access_token: access_token.clone(),
                is_admin: true,
            }),
            credentials: Credentials {
                access_token,
                bot_id: None,
                refresh_token: lookup_str(payload, "refresh_token").map(str::to_string),
            },
        })
    }
}
