//! Single-use OAuth `state` nonces
//!
//! A nonce may be bound to the community whose admin started the flow; the
//! finished install attaches to that community.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

const NONCE_LENGTH: usize = 32;
const NONCE_TTL_MINUTES: i64 = 10;

/// What a consumed nonce was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedState {
    pub issued_at: DateTime<Utc>,
    /// Community to attach the installed platform to
    pub community_id: Option<Uuid>,
}

#[derive(Default)]
pub struct OAuthStates {
    issued: Mutex<HashMap<String, IssuedState>>,
}

impl OAuthStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh nonce, dropping expired ones
    pub async fn issue(&self, community_id: Option<Uuid>) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LENGTH)
            .map(char::from)
            .collect();

        let now = Utc::now();
        let mut issued = self.issued.lock().await;
        issued.retain(|_, state| now - state.issued_at < Duration::minutes(NONCE_TTL_MINUTES));
        issued.insert(
            nonce.clone(),
            IssuedState {
                issued_at: now,
                community_id,
            },
        );
        nonce
    }

    /// Consume a nonce. `None` when it was never issued, already used or expired.
    pub async fn consume(&self, nonce: &str) -> Option<IssuedState> {
        let mut issued = self.issued.lock().await;
        issued
            .remove(nonce)
            .filter(|state| Utc::now() - state.issued_at < Duration::minutes(NONCE_TTL_MINUTES))
    }
}
