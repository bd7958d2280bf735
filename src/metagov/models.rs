//! Broker data models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetagovError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response missing location header")]
    MissingLocation,

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),

    #[error("the governance broker is disabled")]
    Disabled,
}

/// Lifecycle of a broker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Created,
    Pending,
    Completed,
}

impl ProcessStatus {
    pub fn is_open(&self) -> bool {
        !matches!(self, ProcessStatus::Completed)
    }
}

/// Broker view of a process resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessData {
    /// Resource path relative to the broker base URL
    #[serde(default)]
    pub location: String,
    pub status: ProcessStatus,
    #[serde(default)]
    pub outcome: Option<Value>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl ProcessData {
    /// Parse a process resource body. Older brokers wrap it in `data`.
    pub fn from_body(location: &str, body: Value) -> Result<Self, MetagovError> {
        let inner = match body {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };
        let mut data: ProcessData = serde_json::from_value(inner)
            .map_err(|e| MetagovError::InvalidResponse(e.to_string()))?;
        data.location = location.to_string();
        Ok(data)
    }
}

/// Body of a community registration
#[derive(Debug, Clone, Serialize)]
pub struct CommunityRegistration {
    pub name: String,
    pub readable_name: String,
    pub plugins: Vec<Value>,
}

/// Platform event forwarded by the broker
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerEvent {
    pub community: String,
    pub source: String,
    pub event_type: String,
    pub initiator: BrokerInitiator,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerInitiator {
    pub user_id: String,
    pub provider: String,
    #[serde(default)]
    pub is_metagov_bot: bool,
}

impl BrokerInitiator {
    /// Username unique across providers
    pub fn prefixed_username(&self) -> String {
        format!("{}.{}", self.provider, self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_process_from_wrapped_body() {
        let body = json!({"data": {"status": "pending", "outcome": {"issue_number": 12}}});
        let data = ProcessData::from_body("/api/internal/process/x/1", body).unwrap();
        assert_eq!(data.status, ProcessStatus::Pending);
        assert_eq!(data.location, "/api/internal/process/x/1");
        assert_eq!(data.outcome, Some(json!({"issue_number": 12})));
    }

    #[test]
    fn test_process_from_flat_body() {
        let body = json!({"id": 1, "status": "completed", "errors": {}});
        let data = ProcessData::from_body("/p/1", body).unwrap();
        assert!(!data.status.is_open());
        assert!(data.outcome.is_none());
    }

    #[test]
    fn test_process_rejects_unknown_status() {
        let body = json!({"status": "exploded"});
        assert!(ProcessData::from_body("/p/1", body).is_err());
    }
}
