//! Open Collective adapter
//!
//! Open Collective events only arrive through the broker. Expense events
//! become trigger actions; replies and expense processing are broker actions.

use crate::action::ActionKind;
use crate::community::Platform;
use crate::integrations::{
    content, lookup_id, IntegrationError, NormalizedAction, PlatformAdapter, PlatformUser,
};
use crate::metagov::{BrokerEvent, GovernanceBroker, MetagovError};
use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

const EXPENSE_EVENTS: &[&str] = &[
    "expense_created",
    "expense_rejected",
    "expense_approved",
    "expense_deleted",
    "expense_unapproved",
    "expense_paid",
];

pub struct OpencollectiveAdapter;

impl PlatformAdapter for OpencollectiveAdapter {
    fn platform(&self) -> Platform {
        Platform::Opencollective
    }

    fn default_api_base(&self) -> &'static str {
        "https://api.opencollective.com/"
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "collective/slug").or_else(|| lookup_id(payload, "team_id"))
    }

    /// `expense_created` becomes the trigger `expensecreated`; other events are dropped
    fn normalize_broker_event(&self, event: &BrokerEvent) -> Option<NormalizedAction> {
        if !EXPENSE_EVENTS.contains(&event.event_type.as_str()) {
            return None;
        }
        let mut fields = event.data.as_object().cloned().unwrap_or_default();
        for key in ["id", "url", "description"] {
            if let Some(value) = event.data.get(key) {
                let alias = if key == "id" { "expense_id" } else { key };
                fields.insert(alias.to_string(), value.clone());
            }
        }

        Some(NormalizedAction {
            kind: ActionKind::Trigger,
            action_type: event.event_type.replace('_', ""),
            initiator: (!event.initiator.user_id.is_empty()).then(|| PlatformUser {
                username: event.initiator.user_id.clone(),
                readable_name: Some(event.initiator.user_id.clone()),
            }),
            content: fields,
            community_origin: true,
        })
    }

    fn vote_process(&self) -> Option<&'static str> {
        Some("opencollective.vote")
    }

    fn vote_payload(
        &self,
        action: &crate::action::GovernableAction,
        target: Option<&str>,
    ) -> Result<Map<String, Value>, IntegrationError> {
        let title = target
            .map(str::to_string)
            .or_else(|| action.content_str("description").map(|d| format!("Vote on expense: {}", d)))
            .ok_or_else(|| IntegrationError::MissingField("description".to_string()))?;
        Ok(content([
            ("title", Some(json!(title))),
            ("options", Some(json!(["yes", "no"]))),
        ]))
    }

    fn vote_post_key(&self) -> &'static str {
        "conversation_id"
    }
}

/// Comment on an expense
pub async fn post_message(
    broker: &dyn GovernanceBroker,
    community: &str,
    text: &str,
    expense_id: &str,
) -> Result<Value, MetagovError> {
    broker
        .perform_action(
            community,
            "opencollective.create-comment",
            json!({"raw": text, "expense_id": expense_id}),
        )
        .await
}

/// Approve, reject or pay an expense
pub async fn process_expense(
    broker: &dyn GovernanceBroker,
    community: &str,
    expense_id: &str,
    action: &str,
) -> Result<Value, MetagovError> {
    broker
        .perform_action(
            community,
            "opencollective.process-expense",
            json!({"expense_id": expense_id, "action": action}),
        )
        .await
}
