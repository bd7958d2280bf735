//! Slack adapter
//!
//! Events API webhooks in, Web API form calls out.

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Credentials, Platform};
use crate::integrations::{
    content, lookup, lookup_id, lookup_str, pick, ExecutionCall, Inbound, Installer,
    IntegrationError, NormalizedAction, OAuthGrant, PlatformAdapter, PlatformUser, ReactionVote,
    TokenScope,
};
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

const ACTIONS: &[&str] = &[
    "slackpostmessage",
    "slackschedulemessage",
    "slackrenameconversation",
    "slackkickconversation",
    "slackjoinconversation",
    "slackpinmessage",
    "slackusergroupcreate",
];

pub struct SlackAdapter;

impl SlackAdapter {
    fn action(
        action_type: &str,
        user: Option<&str>,
        fields: Map<String, Value>,
    ) -> Inbound {
        Inbound::Action(NormalizedAction {
            kind: ActionKind::Platform,
            action_type: action_type.to_string(),
            initiator: user.map(PlatformUser::new),
            content: fields,
            community_origin: true,
        })
    }
}

/// `+1` / `-1` reactions, with any skin tone
fn reaction_to_boolean(reaction: &str) -> Option<bool> {
    if reaction == "+1" || reaction.starts_with("+1::skin-tone-") {
        Some(true)
    } else if reaction == "-1" || reaction.starts_with("-1::skin-tone-") {
        Some(false)
    } else {
        None
    }
}

impl PlatformAdapter for SlackAdapter {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    fn default_api_base(&self) -> &'static str {
        "https://slack.com/api/"
    }

    fn action_types(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn challenge(&self, payload: &Value) -> Option<String> {
        if lookup_str(payload, "type") == Some("url_verification") {
            lookup_str(payload, "challenge").map(str::to_string)
        } else {
            None
        }
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "team_id")
    }

    fn delivery_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "event_id")
    }

    fn normalize(
        &self,
        platform: &CommunityPlatform,
        _headers: &HeaderMap,
        payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        if lookup_str(payload, "type") != Some("event_callback") {
            return Ok(Inbound::Ignored("not an event callback".to_string()));
        }
        let event = payload
            .get("event")
            .ok_or_else(|| IntegrationError::MissingField("event".to_string()))?;
        let user = lookup_str(event, "user");

        if user.is_some() && user == platform.credentials.bot_id.as_deref() {
            return Ok(Inbound::Ignored("event from the PolicyKit bot".to_string()));
        }

        let inbound = match lookup_str(event, "type") {
            Some("message") if event.get("subtype").is_none() => Self::action(
                "slackpostmessage",
                user,
                content([
                    ("text", event.get("text").cloned()),
                    ("channel", event.get("channel").cloned()),
                    ("timestamp", event.get("ts").cloned()),
                ]),
            ),
            Some("channel_rename") => Self::action(
                "slackrenameconversation",
                user,
                content([
                    ("channel", lookup(event, "channel/id").cloned()),
                    ("name", lookup(event, "channel/name").cloned()),
                ]),
            ),
            Some("member_joined_channel") => Self::action(
                "slackjoinconversation",
                lookup_str(event, "inviter").or(user),
                content([
                    ("channel", event.get("channel").cloned()),
                    ("users", event.get("user").cloned()),
                ]),
            ),
            Some("pin_added") => Self::action(
                "slackpinmessage",
                user,
                content([
                    ("channel", event.get("channel_id").cloned()),
                    ("timestamp", lookup(event, "item/message/ts").cloned()),
                ]),
            ),
            Some("reaction_added") => {
                let value = lookup_str(event, "reaction").and_then(reaction_to_boolean);
                match (value, lookup_id(event, "item/ts"), user) {
                    (Some(value), Some(post_id), Some(user)) => Inbound::Vote(ReactionVote {
                        post_id,
                        voter: PlatformUser::new(user),
                        value,
                    }),
                    _ => Inbound::Ignored("reaction is not a vote".to_string()),
                }
            }
            other => Inbound::Ignored(format!("unhandled event type {:?}", other)),
        };
        Ok(inbound)
    }

    fn execution_call(&self, action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        let call = match action.action_type.as_str() {
            "slackpostmessage" => ExecutionCall::form("chat.postMessage", pick(action, &["text", "channel"])?)
                .with_token(TokenScope::AdminBot),
            "slackrenameconversation" => {
                ExecutionCall::form("conversations.rename", pick(action, &["channel", "name"])?)
                    .with_token(TokenScope::AdminUser)
            }
            "slackjoinconversation" => {
                ExecutionCall::form("conversations.invite", pick(action, &["channel", "users"])?)
                    .with_token(TokenScope::AdminUser)
            }
            "slackpinmessage" => {
                ExecutionCall::form("pins.add", pick(action, &["channel", "timestamp"])?)
            }
            "slackschedulemessage" => ExecutionCall::form(
                "chat.scheduleMessage",
                pick(action, &["text", "channel", "post_at"])?,
            )
            .with_token(TokenScope::User),
            "slackkickconversation" => {
                ExecutionCall::form("conversations.kick", pick(action, &["user", "channel"])?)
                    .with_token(TokenScope::AdminUser)
            }
            "slackusergroupcreate" => {
                ExecutionCall::form("usergroups.create", pick(action, &["name", "description"])?)
                    .with_token(TokenScope::AdminUser)
            }
            _ => return Err(self.unsupported("this action type")),
        };
        Ok(call)
    }

    /// Delete posted messages, kick joined users, unpin pins
    fn revert_call(&self, action: &GovernableAction) -> Option<ExecutionCall> {
        let field = |key: &str| action.content.get(key).filter(|v| !v.is_null()).cloned();
        let channel = field("channel")?;
        let call = match action.action_type.as_str() {
            "slackpostmessage" => ExecutionCall::form(
                "chat.delete",
                Map::from_iter([("channel".to_string(), channel), ("ts".to_string(), field("timestamp")?)]),
            ),
            "slackjoinconversation" => ExecutionCall::form(
                "conversations.kick",
                Map::from_iter([("channel".to_string(), channel), ("user".to_string(), field("users")?)]),
            ),
            "slackpinmessage" => ExecutionCall::form(
                "pins.remove",
                Map::from_iter([
                    ("channel".to_string(), channel),
                    ("timestamp".to_string(), field("timestamp")?),
                ]),
            ),
            _ => return None,
        };
        Some(call.with_token(TokenScope::AdminUser))
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("slack.emoji-vote")
    }

    fn vote_payload(
        &self,
        action: &GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let channel = target
            .or_else(|| action.content_str("channel"))
            .ok_or_else(|| IntegrationError::MissingField("channel".to_string()))?;
        Ok(content([
            ("channel", Some(json!(channel))),
            ("poll_type", Some(json!("boolean"))),
        ]))
    }

    fn vote_post_key(&self) -> &'static str {
        "message_ts"
    }

    /// `oauth.v2.access` response
    fn oauth_token_url(&self) -> Option<&'static str> {
        Some("https://slack.com/api/oauth.v2.access")
    }

    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        if payload.get("ok").and_then(Value::as_bool) == Some(false) {
            let error = lookup_str(payload, "error").unwrap_or("unknown error");
            return Err(IntegrationError::InvalidPayload(format!("slack oauth failed: {}", error)));
        }
        let team_id = lookup_id(payload, "team/id")
            .ok_or_else(|| IntegrationError::MissingField("team.id".to_string()))?;

        let installer = lookup_id(payload, "authed_user/id").map(|id| Installer {
            username: id,
            readable_name: None,
            access_token: lookup_str(payload, "authed_user/access_token").map(str::to_string),
            is_admin: true,
        });

        Ok(OAuthGrant {
            community_name: lookup_str(payload, "team/name")
                .map(str::to_string)
                .unwrap_or_else(|| team_id.clone()),
            team_id,
            credentials: Credentials {
                access_token: lookup_str(payload, "access_token").map(str::to_string),
                bot_id: lookup_id(payload, "bot_user_id"),
                refresh_token: lookup_str(payload, "refresh_token").map(str::to_string),
            },
            installer,
        })
    }
}
