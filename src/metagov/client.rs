//! Metagov HTTP client

use crate::metagov::{CommunityRegistration, MetagovError, ProcessData};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const COMMUNITY_HEADER: &str = "X-Metagov-Community";

/// Operations PolicyKit needs from the governance broker
#[async_trait]
pub trait GovernanceBroker: Send + Sync {
    /// Create or update the broker community `slug`
    async fn register_community(
        &self,
        slug: &str,
        readable_name: &str,
        plugins: Vec<Value>,
    ) -> Result<Value, MetagovError>;

    /// Start a process and return its initial state
    async fn start_process(
        &self,
        community: &str,
        process_type: &str,
        payload: Value,
    ) -> Result<ProcessData, MetagovError>;

    async fn get_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError>;

    /// Close a process and return its final state
    async fn close_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError>;

    async fn perform_action(
        &self,
        community: &str,
        action_type: &str,
        parameters: Value,
    ) -> Result<Value, MetagovError>;

    async fn get_resource(
        &self,
        community: &str,
        name: &str,
        params: &[(String, String)],
    ) -> Result<Value, MetagovError>;
}

/// reqwest-backed broker client
pub struct MetagovClient {
    base_url: String,
    client: Client,
}

impl MetagovClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MetagovError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(request: RequestBuilder) -> Result<Response, MetagovError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MetagovError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn json(response: Response) -> Result<Value, MetagovError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| MetagovError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GovernanceBroker for MetagovClient {
    async fn register_community(
        &self,
        slug: &str,
        readable_name: &str,
        plugins: Vec<Value>,
    ) -> Result<Value, MetagovError> {
        let body = CommunityRegistration {
            name: slug.to_string(),
            readable_name: readable_name.to_string(),
            plugins,
        };
        let url = self.url(&format!("/api/internal/community/{}", slug));
        let response = Self::send(self.client.put(url).json(&body)).await?;
        info!("Registered community '{}' with Metagov", slug);
        Self::json(response).await
    }

    async fn start_process(
        &self,
        community: &str,
        process_type: &str,
        payload: Value,
    ) -> Result<ProcessData, MetagovError> {
        let url = self.url(&format!("/api/internal/process/{}", process_type));
        info!("Starting '{}' process for {}", process_type, community);
        debug!("Process payload: {}", payload);

        let response = Self::send(
            self.client
                .post(url)
                .header(COMMUNITY_HEADER, community)
                .json(&payload),
        )
        .await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(MetagovError::MissingLocation)?;

        self.get_process(community, &location).await
    }

    async fn get_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError> {
        let response = Self::send(
            self.client
                .get(self.url(location))
                .header(COMMUNITY_HEADER, community),
        )
        .await?;
        ProcessData::from_body(location, Self::json(response).await?)
    }

    async fn close_process(&self, community: &str, location: &str) -> Result<ProcessData, MetagovError> {
        info!("Closing process at '{}'", location);
        let response = Self::send(
            self.client
                .delete(self.url(location))
                .header(COMMUNITY_HEADER, community),
        )
        .await?;
        ProcessData::from_body(location, Self::json(response).await?)
    }

    async fn perform_action(
        &self,
        community: &str,
        action_type: &str,
        parameters: Value,
    ) -> Result<Value, MetagovError> {
        let url = self.url(&format!("/api/internal/action/{}", action_type));
        let response = Self::send(
            self.client
                .post(url)
                .header(COMMUNITY_HEADER, community)
                .json(&json!({ "parameters": parameters })),
        )
        .await?;
        Self::json(response).await
    }

    async fn get_resource(
        &self,
        community: &str,
        name: &str,
        params: &[(String, String)],
    ) -> Result<Value, MetagovError> {
        let url = self.url(&format!("/api/internal/resource/{}", name));
        let response = Self::send(
            self.client
                .get(url)
                .header(COMMUNITY_HEADER, community)
                .query(params),
        )
        .await?;
        Self::json(response).await
    }
}

/// Broker used when Metagov is disabled
pub struct DisabledBroker;

#[async_trait]
impl GovernanceBroker for DisabledBroker {
    async fn register_community(&self, _: &str, _: &str, _: Vec<Value>) -> Result<Value, MetagovError> {
        Err(MetagovError::Disabled)
    }

    async fn start_process(&self, _: &str, _: &str, _: Value) -> Result<ProcessData, MetagovError> {
        Err(MetagovError::Disabled)
    }

    async fn get_process(&self, _: &str, _: &str) -> Result<ProcessData, MetagovError> {
        Err(MetagovError::Disabled)
    }

    async fn close_process(&self, _: &str, _: &str) -> Result<ProcessData, MetagovError> {
        Err(MetagovError::Disabled)
    }

    async fn perform_action(&self, _: &str, _: &str, _: Value) -> Result<Value, MetagovError> {
        Err(MetagovError::Disabled)
    }

    async fn get_resource(&self, _: &str, _: &str, _: &[(String, String)]) -> Result<Value, MetagovError> {
        Err(MetagovError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metagov::ProcessStatus;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<String>>>;

    async fn start(
        State(seen): State<Seen>,
        Path(name): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let community = headers
            .get(COMMUNITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        seen.lock().unwrap().push(format!("{} {} {}", name, community, body["question"]));
        (
            StatusCode::CREATED,
            [(LOCATION, "/api/internal/process/github.issue-react-vote/9")],
        )
    }

    async fn resource() -> Json<Value> {
        Json(json!({"id": 9, "status": "pending", "outcome": {"issue_number": 42}}))
    }

    async fn spawn_broker() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/internal/process/{name}", post(start))
            .route(
                "/api/internal/process/github.issue-react-vote/9",
                get(resource).delete(|| async {
                    Json(json!({"status": "completed", "outcome": {"votes": {}}}))
                }),
            )
            .route(
                "/api/internal/action/{name}",
                post(|Json(body): Json<Value>| async move { Json(json!({"echo": body})) }),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_start_process_follows_location() {
        let (url, seen) = spawn_broker().await;
        let client = MetagovClient::new(url, Duration::from_secs(5)).unwrap();

        let process = client
            .start_process(
                "github-4242",
                "github.issue-react-vote",
                json!({"question": "Ship it?"}),
            )
            .await
            .unwrap();

        assert_eq!(process.status, ProcessStatus::Pending);
        assert_eq!(process.location, "/api/internal/process/github.issue-react-vote/9");
        assert_eq!(process.outcome.unwrap()["issue_number"], 42);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["github.issue-react-vote github-4242 \"Ship it?\""]
        );
    }

    #[tokio::test]
    async fn test_close_process_returns_final_state() {
        let (url, _) = spawn_broker().await;
        let client = MetagovClient::new(url, Duration::from_secs(5)).unwrap();
        let process = client
            .close_process("c", "/api/internal/process/github.issue-react-vote/9")
            .await
            .unwrap();
        assert_eq!(process.status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn test_perform_action_wraps_parameters() {
        let (url, _) = spawn_broker().await;
        let client = MetagovClient::new(url, Duration::from_secs(5)).unwrap();
        let result = client
            .perform_action("c", "sourcecred.user-cred", json!({"username": "ada"}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["parameters"]["username"], "ada");
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let (url, _) = spawn_broker().await;
        let client = MetagovClient::new(url, Duration::from_secs(5)).unwrap();
        let err = client.get_process("c", "/missing").await.unwrap_err();
        assert!(matches!(err, MetagovError::Status { status: 404, .. }));
    }
}
