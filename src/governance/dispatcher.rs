//! Execution dispatcher
//!
//! Replays a passed action against its platform API exactly once. The
//! dispatch record claimed on the proposal is the idempotency marker.

use crate::action::{ActionKind, ActionStatus, GovernableAction};
use crate::community::CommunityPlatform;
use crate::config::DispatchConfig;
use crate::db::Table;
use crate::error::AppError;
use crate::governance::{DispatchError, Governance};
use crate::integrations::{AuthStyle, Encoding, ExecutionCall, TokenScope};
use crate::proposal::{DispatchRecord, DispatchState, Proposal};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// HTTP sender for platform calls
#[derive(Clone)]
pub struct Dispatcher {
    client: Client,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Send a call, retrying transport errors and 5xx responses with
    /// exponential backoff. A 4xx response fails immediately.
    pub async fn send(&self, api_base: &str, call: &ExecutionCall, token: &str) -> DispatchRecord {
        let url = format!(
            "{}/{}",
            api_base.trim_end_matches('/'),
            call.method.trim_start_matches('/')
        );
        let mut record = DispatchRecord::in_flight();

        for attempt in 1..=self.config.max_attempts {
            record.attempts = attempt;
            debug!("{} {} (attempt {})", call.http_method, url, attempt);

            match self.request(&url, call, token).send().await {
                Ok(response) => {
                    let status = response.status();
                    record.status_code = Some(status.as_u16());
                    let body = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        match platform_error(&body) {
                            Some(error) => {
                                record.state = DispatchState::Failed;
                                record.error = Some(error);
                            }
                            None => record.state = DispatchState::Succeeded,
                        }
                        break;
                    }
                    record.error = Some(format!("{}: {}", status, body));
                    if status.is_client_error() {
                        record.state = DispatchState::Failed;
                        break;
                    }
                }
                Err(e) => {
                    record.status_code = None;
                    record.error = Some(e.to_string());
                }
            }

            if attempt < self.config.max_attempts {
                let delay = self.config.backoff_ms.saturating_mul(1 << (attempt - 1).min(16));
                warn!("{} failed, retrying in {}ms", url, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                record.state = DispatchState::Failed;
            }
        }

        record.finished_at = Some(Utc::now());
        record
    }

    fn request(&self, url: &str, call: &ExecutionCall, token: &str) -> reqwest::RequestBuilder {
        let mut params = call.params.clone();
        let mut request = self.client.request(call.http_method.clone(), url);
        match call.auth {
            AuthStyle::BodyToken => {
                params.insert("token".to_string(), Value::String(token.to_string()));
            }
            AuthStyle::Header { name, prefix } => {
                request = request.header(name, format!("{}{}", prefix, token));
            }
        }

        match call.encoding {
            Encoding::Form => {
                let form: Vec<(String, String)> = params
                    .into_iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => (k, s),
                        other => (k, other.to_string()),
                    })
                    .collect();
                request.form(&form)
            }
            Encoding::Json => request.json(&params),
        }
    }
}

/// Slack-style `{"ok": false, "error": ...}` bodies on a 200
fn platform_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    if value.get("ok").and_then(Value::as_bool) == Some(false) {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        return Some(format!("platform error: {}", error));
    }
    None
}

impl Governance {
    /// Dispatch a passed proposal's action. Never sends twice.
    pub async fn execute_proposal(&self, proposal_id: Uuid) -> Result<Proposal, AppError> {
        let proposal = self.proposals.get(proposal_id).await?;
        let action = self.actions.get(proposal.action_id).await?;
        if action.kind == ActionKind::Trigger {
            return Err(DispatchError::NotExecutable("trigger".to_string()).into());
        }

        let proposal = self.proposals.claim_dispatch(proposal_id).await?;
        self.db.save(Table::Proposals, proposal.id, &proposal).await;
        info!("Dispatching {} action {}", action.action_type, action.id);

        let record = match self.communities.get_platform(action.community_platform_id).await {
            Ok(platform) => self.dispatch(&platform, &action).await,
            Err(e) => failed(e.to_string()),
        };
        let succeeded = record.state == DispatchState::Succeeded;
        let error = record.error.clone();
        let status_code = record.status_code;

        let proposal = self.proposals.finish_dispatch(proposal_id, record).await?;
        self.db.save(Table::Proposals, proposal.id, &proposal).await;

        if succeeded {
            let action = self.actions.set_status(action.id, ActionStatus::Executed).await?;
            self.db.save(Table::Actions, action.id, &action).await;
            info!("Action {} executed", action.id);
            return Ok(proposal);
        }

        let error = error.unwrap_or_else(|| "unknown error".to_string());
        warn!("Action {} failed to execute: {}", action.id, error);
        Err(match status_code {
            Some(status) if status >= 400 => DispatchError::Rejected { status, body: error },
            _ => DispatchError::Failed(error),
        }
        .into())
    }

    async fn dispatch(&self, platform: &CommunityPlatform, action: &GovernableAction) -> DispatchRecord {
        if !platform.is_active {
            return failed(format!("{} integration is disabled", platform.platform));
        }
        if action.kind == ActionKind::Constitution {
            let mut record = match self.apply_constitution_action(platform, action).await {
                Ok(()) => DispatchRecord::in_flight(),
                Err(e) => failed(e.to_string()),
            };
            if record.error.is_none() {
                record.state = DispatchState::Succeeded;
                record.attempts = 1;
                record.finished_at = Some(Utc::now());
            }
            return record;
        }

        if action.community_origin && !action.community_revert {
            // Still live on the platform; replaying it would duplicate it
            debug!("Action {} already in effect on {}", action.id, platform.platform);
            return applied();
        }

        let adapter = match self.adapters.get(platform.platform) {
            Ok(adapter) => adapter,
            Err(e) => return failed(e.to_string()),
        };
        let call = match adapter.execution_call(action) {
            Ok(call) => adapter.prepare_call(call, platform),
            Err(e) => return failed(e.to_string()),
        };
        self.send_call(platform, action, &call).await
    }

    async fn send_call(
        &self,
        platform: &CommunityPlatform,
        action: &GovernableAction,
        call: &ExecutionCall,
    ) -> DispatchRecord {
        let Some(token) = self.resolve_token(platform, action, call.token).await else {
            return failed(format!("no {:?} token available", call.token));
        };
        let api_base = match self.adapters.get(platform.platform) {
            Ok(_) if !platform.api_base.is_empty() => platform.api_base.as_str(),
            Ok(adapter) => adapter.default_api_base(),
            Err(e) => return failed(e.to_string()),
        };
        self.dispatcher.send(api_base, call, &token).await
    }

    /// Undo a community-origin action on its platform. Returns the updated
    /// action when the platform confirmed the revert.
    pub async fn revert_action(
        &self,
        platform: &CommunityPlatform,
        action: &GovernableAction,
    ) -> Option<GovernableAction> {
        if action.kind != ActionKind::Platform || !action.community_origin || action.community_revert {
            return None;
        }
        let adapter = self.adapters.get(platform.platform).ok()?;
        let Some(call) = adapter.revert_call(action) else {
            debug!("{} action {} cannot be reverted", action.action_type, action.id);
            return None;
        };

        let record = self.send_call(platform, action, &call).await;
        if record.state != DispatchState::Succeeded {
            warn!(
                "Failed to revert action {}: {}",
                action.id,
                record.error.unwrap_or_else(|| "unknown error".to_string())
            );
            return None;
        }

        match self.actions.mark_reverted(action.id).await {
            Ok(action) => {
                self.db.save(Table::Actions, action.id, &action).await;
                info!("Reverted {} action {} pending a decision", action.action_type, action.id);
                Some(action)
            }
            Err(e) => {
                warn!("Reverted action {} could not be recorded: {}", action.id, e);
                None
            }
        }
    }

    /// Pick the token an action executes with
    async fn resolve_token(
        &self,
        platform: &CommunityPlatform,
        action: &GovernableAction,
        scope: TokenScope,
    ) -> Option<String> {
        let bot = platform.credentials.access_token.clone();
        let initiator = match action.initiator_id {
            Some(id) => self.communities.get_user(id).await,
            None => None,
        };

        match scope {
            TokenScope::Bot => bot,
            TokenScope::User => match initiator.and_then(|u| u.access_token) {
                Some(token) => Some(token),
                None => self.communities.admin_user_token(platform.id).await.or(bot),
            },
            TokenScope::AdminUser => self.communities.admin_user_token(platform.id).await.or(bot),
            TokenScope::AdminBot => initiator
                .filter(|u| u.is_community_admin)
                .and_then(|u| u.access_token)
                .or(bot),
        }
    }
}

fn applied() -> DispatchRecord {
    let mut record = DispatchRecord::in_flight();
    record.state = DispatchState::Succeeded;
    record.finished_at = Some(Utc::now());
    record
}

fn failed(error: String) -> DispatchRecord {
    let mut record = DispatchRecord::in_flight();
    record.state = DispatchState::Failed;
    record.error = Some(error);
    record.finished_at = Some(Utc::now());
    record
}
