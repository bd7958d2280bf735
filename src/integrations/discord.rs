//! Discord adapter
//!
//! Gateway dispatch payloads in, REST JSON calls with a bot token out.

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Credentials, Platform};
use crate::integrations::{
    content, lookup_id, lookup_str, value_to_id, AuthStyle, ExecutionCall, Inbound, IntegrationError,
    NormalizedAction, OAuthGrant, PlatformAdapter, PlatformUser,
};
use axum::http::HeaderMap;
use reqwest::Method;
use serde_json::{json, Map, Value};

const BOT_AUTH: AuthStyle = AuthStyle::Header {
    name: "Authorization",
    prefix: "Bot ",
};

pub struct DiscordAdapter;

impl DiscordAdapter {
    fn channel(action: &GovernableAction) -> Result<&str, IntegrationError> {
        action
            .content_str("channel")
            .ok_or_else(|| IntegrationError::MissingField("channel".to_string()))
    }

    fn field(action: &GovernableAction, key: &str) -> Result<Value, IntegrationError> {
        action
            .content
            .get(key)
            .cloned()
            .ok_or_else(|| IntegrationError::MissingField(key.to_string()))
    }
}

impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn default_api_base(&self) -> &'static str {
        "https://discordapp.com/api/"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["discordpostmessage", "discordrenamechannel"]
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "d/guild_id").or_else(|| lookup_id(payload, "guild_id"))
    }

    /// Message snowflakes are unique; other dispatches fall back to a body hash
    fn delivery_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        if lookup_str(payload, "t") != Some("MESSAGE_CREATE") {
            return None;
        }
        lookup_id(payload, "d/id").map(|id| format!("MESSAGE_CREATE:{}", id))
    }

    fn normalize(
        &self,
        platform: &CommunityPlatform,
        _headers: &HeaderMap,
        payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        let data = payload
            .get("d")
            .ok_or_else(|| IntegrationError::MissingField("d".to_string()))?;
        let author = lookup_id(data, "author/id");
        if author.is_some() && author == platform.credentials.bot_id {
            return Ok(Inbound::Ignored("message from the PolicyKit bot".to_string()));
        }

        let (action_type, fields, initiator) = match lookup_str(payload, "t") {
            Some("MESSAGE_CREATE") => (
                "discordpostmessage",
                content([
                    ("channel", data.get("channel_id").cloned()),
                    ("text", data.get("content").cloned()),
                    ("message_id", data.get("id").cloned()),
                ]),
                author.map(|id| PlatformUser {
                    username: id,
                    readable_name: lookup_str(data, "author/username").map(str::to_string),
                }),
            ),
            Some("CHANNEL_UPDATE") => (
                "discordrenamechannel",
                content([
                    ("channel", data.get("id").cloned()),
                    ("name", data.get("name").cloned()),
                ]),
                None,
            ),
            other => return Ok(Inbound::Ignored(format!("unhandled dispatch {:?}", other))),
        };

        Ok(Inbound::Action(NormalizedAction {
            kind: ActionKind::Platform,
            action_type: action_type.to_string(),
            initiator,
            content: fields,
            community_origin: true,
        }))
    }

    fn execution_call(&self, action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        let channel = Self::channel(action)?;
        let call = match action.action_type.as_str() {
            "discordpostmessage" => ExecutionCall::json(
                format!("channels/{}/messages", channel),
                Method::POST,
                Map::from_iter([("content".to_string(), Self::field(action, "text")?)]),
            ),
            "discordrenamechannel" => ExecutionCall::json(
                format!("channels/{}", channel),
                Method::PATCH,
                Map::from_iter([("name".to_string(), Self::field(action, "name")?)]),
            ),
            _ => return Err(self.unsupported("this action type")),
        };
        Ok(call.with_auth(BOT_AUTH))
    }

    fn revert_call(&self, action: &GovernableAction) -> Option<ExecutionCall> {
        if action.action_type != "discordpostmessage" {
            return None;
        }
        let channel = action.content_str("channel")?;
        let message = action.content.get("message_id").and_then(value_to_id)?;
        Some(
            ExecutionCall::json(
                format!("channels/{}/messages/{}", channel, message),
                Method::DELETE,
                Map::new(),
            )
            .with_auth(BOT_AUTH),
        )
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("discord.vote")
    }

    fn vote_payload(
        &self,
        action: &GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let channel = match target {
            Some(target) => target,
            None => Self::channel(action)?,
        };
        Ok(content([
            ("channel", Some(json!(channel))),
            ("options", Some(json!(["yes", "no"]))),
        ]))
    }

    fn vote_post_key(&self) -> &'static str {
        "message_id"
    }

    /// OAuth2 token response with the bot scope
    fn oauth_token_url(&self) -> Option<&'static str> {
        Some("https://discord.com/api/oauth2/token")
    }

    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        let team_id = lookup_id(payload, "guild/id")
            .ok_or_else(|| IntegrationError::MissingField("guild.id".to_string()))?;
        Ok(OAuthGrant {
            community_name: lookup_str(payload, "guild/name")
                .map(str::to_string)
                .unwrap_or_else(|| team_id.clone()),
            team_id,
            credentials: Credentials {
                access_token: lookup_str(payload, "access_token").map(str::to_string),
                bot_id: lookup_id(payload, "bot_id"),
                refresh_token: lookup_str(payload, "refresh_token").map(str::to_string),
            },
            installer: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::fixtures;

    #[test]
    fn test_message_create() {
        let platform = fixtures::platform(Platform::Discord, "G1", Credentials::default());
        let payload = json!({
            "t": "MESSAGE_CREATE",
            "d": {"id": "M1", "guild_id": "G1", "channel_id": "C1", "content": "hello",
                  "author": {"id": "A1", "username": "ada"}}
        });

        assert_eq!(DiscordAdapter.team_id(&HeaderMap::new(), &payload).as_deref(), Some("G1"));
        assert_eq!(
            DiscordAdapter.delivery_id(&HeaderMap::new(), &payload).as_deref(),
            Some("MESSAGE_CREATE:M1")
        );
        let Inbound::Action(action) = DiscordAdapter
            .normalize(&platform, &HeaderMap::new(), &payload)
            .unwrap()
        else {
            panic!("expected an action");
        };
        assert_eq!(action.action_type, "discordpostmessage");
        assert_eq!(action.initiator.unwrap().readable_name.as_deref(), Some("ada"));
    }

    #[test]
    fn test_rename_is_patch_with_bot_auth() {
        let action = fixtures::action(
            ActionKind::Platform,
            "discordrenamechannel",
            json!({"channel": "C1", "name": "lounge"}),
        );
        let call = DiscordAdapter.execution_call(&action).unwrap();
        assert_eq!(call.method, "channels/C1");
        assert_eq!(call.http_method, Method::PATCH);
        assert_eq!(call.params["name"], "lounge");
        assert_eq!(call.auth, BOT_AUTH);
    }

    #[test]
    fn test_revert_deletes_message() {
        let action = fixtures::action(
            ActionKind::Platform,
            "discordpostmessage",
            json!({"channel": "C1", "text": "hello", "message_id": "M1"}),
        );
        let call = DiscordAdapter.revert_call(&action).unwrap();
        assert_eq!(call.method, "channels/C1/messages/M1");
        assert_eq!(call.http_method, Method::DELETE);
    }
}
