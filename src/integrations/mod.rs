//! Platform integrations
//!
//! One [`PlatformAdapter`] per platform translates between the platform's
//! webhooks/APIs and PolicyKit's models. Adapters do no I/O; the dispatcher
//! and the broker client perform the HTTP calls they describe.

mod discord;
mod discourse;
mod github;
mod loomio;
pub mod opencollective;
mod reddit;
mod registry;
mod slack;
pub mod sourcecred;

pub use discord::DiscordAdapter;
pub use discourse::DiscourseAdapter;
pub use github::GithubAdapter;
pub use loomio::LoomioAdapter;
pub use opencollective::OpencollectiveAdapter;
pub use reddit::RedditAdapter;
pub use registry::AdapterRegistry;
pub use slack::SlackAdapter;
pub use sourcecred::SourcecredAdapter;

use crate::action::{ActionKind, GovernableAction};
use crate::community::{CommunityPlatform, Credentials, Platform};
use crate::metagov::BrokerEvent;
use axum::http::HeaderMap;
use reqwest::Method;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("{platform} does not support {operation}")]
    Unsupported {
        platform: Platform,
        operation: &'static str,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing field '{0}'")]
    MissingField(String),
}

/// A platform user observed in an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformUser {
    pub username: String,
    pub readable_name: Option<String>,
}

impl PlatformUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            readable_name: None,
        }
    }
}

/// An event translated into an action draft
#[derive(Debug, Clone)]
pub struct NormalizedAction {
    pub kind: ActionKind,
    pub action_type: String,
    pub initiator: Option<PlatformUser>,
    pub content: Map<String, Value>,
    pub community_origin: bool,
}

/// A vote cast directly on a platform post (e.g. a Slack reaction)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionVote {
    pub post_id: String,
    pub voter: PlatformUser,
    pub value: bool,
}

/// What an inbound webhook means to PolicyKit
#[derive(Debug, Clone)]
pub enum Inbound {
    Action(NormalizedAction),
    Vote(ReactionVote),
    Ignored(String),
}

/// Result of an install or OAuth completion
#[derive(Debug, Clone, Default)]
pub struct OAuthGrant {
    pub team_id: String,
    pub community_name: String,
    pub credentials: Credentials,
    /// The installing user, when the platform reports one
    pub installer: Option<Installer>,
}

#[derive(Debug, Clone, Default)]
pub struct Installer {
    pub username: String,
    pub readable_name: Option<String>,
    pub access_token: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Form,
    Json,
}

/// How the token is attached to a platform request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `token` field in the request body
    BodyToken,
    /// `{name}: {prefix}{token}` header
    Header {
        name: &'static str,
        prefix: &'static str,
    },
}

/// Whose token executes an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    /// The installation's bot token
    Bot,
    /// The initiator's token, falling back to an admin's, then the bot's
    User,
    /// An admin user's token, falling back to the bot's
    AdminUser,
    /// The initiator's token when they are an admin, otherwise the bot's
    AdminBot,
}

/// A platform API call that replays an action
#[derive(Debug, Clone)]
pub struct ExecutionCall {
    /// Path appended to the installation's API base
    pub method: String,
    pub http_method: Method,
    pub params: Map<String, Value>,
    pub encoding: Encoding,
    pub auth: AuthStyle,
    pub token: TokenScope,
}

impl ExecutionCall {
    /// Slack-style form POST with the token in the body
    pub fn form(method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            http_method: Method::POST,
            params,
            encoding: Encoding::Form,
            auth: AuthStyle::BodyToken,
            token: TokenScope::Bot,
        }
    }

    pub fn json(method: impl Into<String>, http_method: Method, params: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            http_method,
            params,
            encoding: Encoding::Json,
            auth: AuthStyle::Header {
                name: "Authorization",
                prefix: "Bearer ",
            },
            token: TokenScope::Bot,
        }
    }

    pub fn with_auth(mut self, auth: AuthStyle) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_token(mut self, token: TokenScope) -> Self {
        self.token = token;
        self
    }
}

/// Yes/no and option votes parsed from a process outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeVotes {
    pub boolean: Vec<(String, bool)>,
    pub number: Vec<(String, i64)>,
}

/// Translation between one platform and PolicyKit
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// API base used when an install does not provide one
    fn default_api_base(&self) -> &'static str;

    /// Action codenames this platform can execute
    fn action_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Handshake challenge to echo back, if the payload is one
    fn challenge(&self, _payload: &Value) -> Option<String> {
        None
    }

    /// External community identifier of a webhook
    fn team_id(&self, headers: &HeaderMap, payload: &Value) -> Option<String>;

    /// Platform delivery id used as idempotency key
    fn delivery_id(&self, _headers: &HeaderMap, _payload: &Value) -> Option<String> {
        None
    }

    fn normalize(
        &self,
        _platform: &CommunityPlatform,
        _headers: &HeaderMap,
        _payload: &Value,
    ) -> Result<Inbound, IntegrationError> {
        Err(self.unsupported("webhooks"))
    }

    /// Translate a broker-forwarded platform event
    fn normalize_broker_event(&self, event: &BrokerEvent) -> Option<NormalizedAction> {
        let content = match &event.data {
            Value::Object(map) => map.clone(),
            other => Map::from_iter([("data".to_string(), other.clone())]),
        };
        Some(NormalizedAction {
            kind: ActionKind::Trigger,
            action_type: format!("{}.{}", event.source, event.event_type),
            initiator: Some(PlatformUser::new(event.initiator.prefixed_username())),
            content,
            community_origin: true,
        })
    }

    fn execution_call(&self, _action: &GovernableAction) -> Result<ExecutionCall, IntegrationError> {
        Err(self.unsupported("action execution"))
    }

    /// Fill in installation-specific call parameters
    fn prepare_call(&self, call: ExecutionCall, _platform: &CommunityPlatform) -> ExecutionCall {
        call
    }

    /// Call that undoes a community-origin action already visible on the
    /// platform. `None` when the action cannot be undone.
    fn revert_call(&self, _action: &GovernableAction) -> Option<ExecutionCall> {
        None
    }

    /// Broker process type used for votes
    fn vote_process(&self) -> Option<&'static str> {
        None
    }

    /// Platform-specific vote fields. `target` overrides where the vote is posted.
    fn vote_payload(
        &self,
        _action: &GovernableAction,
        _target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        Err(self.unsupported("voting"))
    }

    /// Key in the initial process outcome that locates the vote post
    fn vote_post_key(&self) -> &'static str {
        "post_id"
    }

    fn vote_post_id(&self, outcome: &Value) -> Option<String> {
        value_to_id(outcome.get(self.vote_post_key())?)
    }

    fn tally_votes(&self, outcome: &Value) -> OutcomeVotes {
        parse_outcome_votes(outcome)
    }

    /// Token endpoint that install codes are exchanged at. `None` when the
    /// platform's installs are relayed by the broker.
    fn oauth_token_url(&self) -> Option<&'static str> {
        None
    }

    fn parse_oauth(&self, payload: &Value) -> Result<OAuthGrant, IntegrationError> {
        parse_generic_grant(payload)
    }

    fn unsupported(&self, operation: &'static str) -> IntegrationError {
        IntegrationError::Unsupported {
            platform: self.platform(),
            operation,
        }
    }
}

/// Render a JSON string or number as an identifier
pub fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Walk a `/`-separated path into a JSON value
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/').try_fold(payload, |v, key| v.get(key))
}

pub fn lookup_str<'a>(payload: &'a Value, path: &str) -> Option<&'a str> {
    lookup(payload, path).and_then(Value::as_str)
}

pub fn lookup_id(payload: &Value, path: &str) -> Option<String> {
    lookup(payload, path).and_then(value_to_id)
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Copy the named content fields of an action into call parameters
pub fn pick(action: &GovernableAction, fields: &[&str]) -> Result<Map<String, Value>, IntegrationError> {
    fields
        .iter()
        .map(|field| {
            action
                .content
                .get(*field)
                .filter(|v| !v.is_null())
                .cloned()
                .map(|v| (field.to_string(), v))
                .ok_or_else(|| IntegrationError::MissingField(field.to_string()))
        })
        .collect()
}

/// Build a content map from (key, value) pairs, skipping missing values
pub fn content<I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, Option<Value>)>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
}

/// `outcome.votes.{option}.users`: yes/no options become boolean votes,
/// anything else a number vote holding the option's index
pub fn parse_outcome_votes(outcome: &Value) -> OutcomeVotes {
    let mut votes = OutcomeVotes::default();
    let Some(options) = outcome.get("votes").and_then(Value::as_object) else {
        return votes;
    };

    let is_boolean = !options.is_empty() && options.keys().all(|k| k == "yes" || k == "no");
    for (index, (option, result)) in options.iter().enumerate() {
        let users = result
            .get("users")
            .and_then(Value::as_array)
            .map(|u| u.iter().filter_map(value_to_id).collect::<Vec<_>>())
            .unwrap_or_default();
        for user in users {
            if is_boolean {
                votes.boolean.push((user, option == "yes"));
            } else {
                votes.number.push((user, index as i64));
            }
        }
    }
    votes
}

/// Grant fields shared by most platforms
pub fn parse_generic_grant(payload: &Value) -> Result<OAuthGrant, IntegrationError> {
    let team_id = lookup_id(payload, "team_id")
        .ok_or_else(|| IntegrationError::MissingField("team_id".to_string()))?;
    let community_name = lookup_str(payload, "community_name")
        .map(str::to_string)
        .unwrap_or_else(|| team_id.clone());

    let installer = lookup(payload, "user").map(|user| Installer {
        username: lookup_id(user, "id").unwrap_or_default(),
        readable_name: lookup_str(user, "name").map(str::to_string),
        access_token: lookup_str(user, "access_token").map(str::to_string),
        is_admin: user.get("is_admin").and_then(Value::as_bool).unwrap_or(true),
    });

    Ok(OAuthGrant {
        team_id,
        community_name,
        credentials: Credentials {
            access_token: lookup_str(payload, "access_token").map(str::to_string),
            bot_id: lookup_id(payload, "bot_id"),
            refresh_token: lookup_str(payload, "refresh_token").map(str::to_string),
        },
        installer: installer.filter(|i| !i.username.is_empty()),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::action::ActionStatus;
    use chrono::Utc;
    use uuid::Uuid;

    pub fn platform(platform: Platform, team_id: &str, credentials: Credentials) -> CommunityPlatform {
        let now = Utc::now();
        CommunityPlatform {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            platform,
            team_id: team_id.to_string(),
            community_name: "test".to_string(),
            api_base: String::new(),
            credentials,
            metagov_plugin: platform.as_str().to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn action(kind: ActionKind, action_type: &str, content: Value) -> GovernableAction {
        let now = Utc::now();
        GovernableAction {
            id: Uuid::new_v4(),
            community_platform_id: Uuid::new_v4(),
            initiator_id: None,
            kind,
            action_type: action_type.to_string(),
            content: content.as_object().cloned().unwrap_or_default(),
            community_origin: true,
            community_revert: false,
            status: ActionStatus::Pending,
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
