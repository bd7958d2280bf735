//! Server-side exchange of OAuth install codes

use crate::community::Platform;
use crate::config::{OAuthApp, OAuthConfig};
use crate::error::AppError;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Trades an authorization code for the platform's token response
pub struct OAuthExchange {
    client: Client,
    apps: HashMap<Platform, OAuthApp>,
}

impl OAuthExchange {
    pub fn new(config: &OAuthConfig) -> Self {
        Self {
            client: Client::new(),
            apps: config.apps.clone(),
        }
    }

    /// POST the code to the token endpoint. `default_url` is the platform's
    /// endpoint when the app does not override it.
    pub async fn exchange(
        &self,
        platform: Platform,
        default_url: Option<&str>,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<Value, AppError> {
        let app = self
            .apps
            .get(&platform)
            .ok_or_else(|| AppError::BadRequest(format!("No OAuth app configured for {}", platform)))?;
        let url = app
            .token_url
            .as_deref()
            .or(default_url)
            .ok_or_else(|| AppError::BadRequest(format!("{} installs are not exchanged here", platform)))?;

        let mut form = vec![
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri", redirect_uri));
        }

        debug!("Exchanging {} OAuth code at {}", platform, url);
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("{} token exchange failed: {}", platform, e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Unauthorized(format!("Invalid {} token response: {}", platform, e)))?;
        if !status.is_success() {
            warn!("{} rejected OAuth code: {} {}", platform, status, body);
            return Err(AppError::Unauthorized(format!("{} rejected the OAuth code", platform)));
        }
        Ok(body)
    }
}
