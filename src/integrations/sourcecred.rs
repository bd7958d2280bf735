//! SourceCred access
//!
//! SourceCred has no webhooks or actions of its own. Cred scores are read
//! through the broker's sourcecred plugin.

use crate::community::Platform;
use crate::integrations::{lookup_id, PlatformAdapter};
use crate::metagov::{GovernanceBroker, MetagovError};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct SourcecredAdapter;

impl PlatformAdapter for SourcecredAdapter {
    fn platform(&self) -> Platform {
        Platform::Sourcecred
    }

    fn default_api_base(&self) -> &'static str {
        ""
    }

    fn team_id(&self, _headers: &HeaderMap, payload: &Value) -> Option<String> {
        lookup_id(payload, "team_id")
    }
}

/// Identity whose cred is requested
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredSubject {
    Username(String),
    Id(i64),
}

fn value_of(result: Value) -> Result<Value, MetagovError> {
    match result {
        Value::Object(mut map) if map.contains_key("value") => Ok(map.remove("value").unwrap_or_default()),
        other => Err(MetagovError::InvalidResponse(format!("missing cred value in {}", other))),
    }
}

/// Cred of one SourceCred participant
pub async fn get_cred(
    broker: &dyn GovernanceBroker,
    community: &str,
    subject: &CredSubject,
) -> Result<Value, MetagovError> {
    let parameters = match subject {
        CredSubject::Username(username) => json!({ "username": username }),
        CredSubject::Id(id) => json!({ "id": id }),
    };
    value_of(
        broker
            .perform_action(community, "sourcecred.user-cred", parameters)
            .await?,
    )
}

/// Total cred across the SourceCred instance
pub async fn fetch_total_cred(broker: &dyn GovernanceBroker, community: &str) -> Result<Value, MetagovError> {
    value_of(
        broker
            .perform_action(community, "sourcecred.total-cred", json!({}))
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metagov::fake::FakeBroker;

    #[tokio::test]
    async fn test_get_cred_reads_value() {
        let broker = FakeBroker::with_action_result(json!({"value": 12.5}));
        let cred = get_cred(&broker, "acme", &CredSubject::Username("ada".into()))
            .await
            .unwrap();
        assert_eq!(cred, json!(12.5));
        assert_eq!(
            broker.calls(),
            vec![r#"action acme sourcecred.user-cred {"username":"ada"}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_total_cred_requires_value() {
        let broker = FakeBroker::with_action_result(json!({"total": 3}));
        assert!(matches!(
            fetch_total_cred(&broker, "acme").await,
            Err(MetagovError::InvalidResponse(_))
        ));
    }
}
