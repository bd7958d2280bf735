//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod actions;
mod auth;
mod community;
mod ingress;
mod plugins;
mod policies;
mod proposals;

use crate::auth::auth_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Session-protected JSON API
    let api = Router::new()
        .route("/api/auth/me", get(auth::me))
        // Policies
        .route("/api/policies", get(policies::list_policies).post(policies::create_policy))
        .route(
            "/api/policies/{id}",
            get(policies::get_policy)
                .put(policies::update_policy)
                .delete(policies::delete_policy),
        )
        .route("/api/policies/{id}/activate", post(policies::activate_policy))
        .route("/api/policies/{id}/deactivate", post(policies::deactivate_policy))
        // Actions
        .route("/api/actions", get(actions::list_actions).post(actions::submit_action))
        .route("/api/actions/{id}", get(actions::get_action))
        // Proposals
        .route("/api/proposals", get(proposals::list_proposals))
        .route("/api/proposals/{id}", get(proposals::get_proposal))
        .route("/api/proposals/{id}/vote", post(proposals::start_vote))
        .route("/api/proposals/{id}/pass", post(proposals::pass_proposal))
        .route("/api/proposals/{id}/fail", post(proposals::fail_proposal))
        .route("/api/proposals/{id}/close", post(proposals::close_proposal))
        .route("/api/proposals/{id}/refresh", post(proposals::refresh_proposal))
        .route("/api/proposals/{id}/execute", post(proposals::execute_proposal))
        .route("/api/proposals/{id}/votes", get(proposals::list_votes))
        .route("/api/proposals/{id}/data", get(proposals::get_data))
        .route(
            "/api/proposals/{id}/data/{key}",
            get(proposals::get_data_value)
                .put(proposals::set_data)
                .delete(proposals::remove_data),
        )
        // Integrations
        .route(
            "/{platform}/disable_integration_without_deletion",
            post(community::disable_integration),
        )
        .route("/{platform}/init_community_reddit", post(community::init_community_reddit))
        .route(
            "/{platform}/init_community_discourse",
            post(community::init_community_discourse),
        )
        // Broker plugins
        .route("/api/metagov/resources/{name}", get(plugins::get_resource))
        .route("/api/sourcecred/cred", get(plugins::get_cred))
        .route("/api/sourcecred/total", get(plugins::total_cred))
        .route(
            "/api/opencollective/expenses/{expense_id}/comment",
            post(plugins::comment_on_expense),
        )
        .route(
            "/api/opencollective/expenses/{expense_id}/process",
            post(plugins::process_expense),
        )
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Session routes
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))

        // Broker callbacks
        .route("/metagov/internal/outcome/{id}", post(ingress::metagov_outcome))
        .route("/metagov/internal/action", post(ingress::metagov_action))

        // Platform ingress
        .route("/{platform}/authorize", get(ingress::authorize))
        .route("/{platform}/oauth", get(ingress::oauth_redirect).post(ingress::oauth))
        .route("/{platform}/install", post(ingress::install))
        .route("/{platform}/action", post(ingress::action))

        .merge(api)

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "persistence": state.governance.db.is_enabled(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::{harness, methods, settled, votes, Harness};
    use crate::metagov::fake::{pending, FakeBroker};
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app_with(settings: Settings, broker: FakeBroker) -> (Router, Harness) {
        let h = harness(broker).await;
        let state = Arc::new(AppState::new(settings.clone(), h.governance.clone()));
        (create_router(state, &settings), h)
    }

    async fn app() -> (Router, Harness) {
        app_with(Settings::default(), FakeBroker::default()).await
    }

    fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn message_event(event_id: &str) -> Value {
        json!({
            "type": "event_callback",
            "team_id": "T1",
            "event_id": event_id,
            "event": {"type": "message", "user": "U1", "text": "hello", "channel": "C1", "ts": "1.1"}
        })
    }

    /// Store a Slack user token and log in with it
    async fn login(app: &Router, h: &Harness, username: &str, admin: bool) -> String {
        let (mut user, _) = h
            .governance
            .communities
            .get_or_create_user(h.platform.id, username, None)
            .await
            .unwrap();
        user.access_token = Some(format!("xoxp-{}", username));
        user.is_community_admin = admin;
        h.governance.communities.save_user(user).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({
                    "platform": "slack",
                    "teamId": "T1",
                    "userId": username,
                    "userToken": format!("xoxp-{}", username)
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        body["tokens"]["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = app().await;
        let response = app.oneshot(get_with("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["persistence"], false);
    }

    #[tokio::test]
    async fn test_single_data_value_is_readable() {
        let (app, h) = app().await;
        let admin = login(&app, &h, "U1", true).await;
        let response = app
            .clone()
            .oneshot(post_json("/slack/action", message_event("Ev9"), None))
            .await
            .unwrap();
        let id = json_body(response).await["data"]["proposals"][0]["id"]
            .as_str()
            .unwrap()
            .to_string();
        let uri = format!("/api/proposals/{}/data/round", id);

        let put = Request::builder()
            .method(Method::PUT)
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", admin))
            .body(Body::from(json!({"value": 2}).to_string()))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_with(&uri, Some(&admin))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"], 2);

        let missing = format!("/api/proposals/{}/data/absent", id);
        let response = app.oneshot(get_with(&missing, Some(&admin))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_slack_challenge_is_echoed() {
        let (app, _) = app().await;
        let response = app
            .oneshot(post_json(
                "/slack/action",
                json!({"type": "url_verification", "challenge": "3eZbrw1a"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"challenge": "3eZbrw1a"}));
    }

    #[tokio::test]
    async fn test_webhook_is_ingested_once() {
        let (app, _) = app().await;

        let first = app
            .clone()
            .oneshot(post_json("/slack/action", message_event("Ev1"), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let body = json_body(first).await;
        assert_eq!(body["data"]["proposals"].as_array().unwrap().len(), 1);

        let again = app
            .oneshot(post_json("/slack/action", message_event("Ev1"), None))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::OK);
        assert_eq!(json_body(again).await["data"]["duplicate"], true);
    }

    #[tokio::test]
    async fn test_unknown_platform_and_team() {
        let (app, _) = app().await;
        let response = app
            .clone()
            .oneshot(post_json("/myspace/action", json!({}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut event = message_event("Ev2");
        event["team_id"] = json!("T404");
        let response = app
            .oneshot(post_json("/slack/action", event, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_requires_session() {
        let (app, _) = app().await;
        let response = app.oneshot(get_with("/api/policies", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let (app, h) = app().await;
        let token = login(&app, &h, "U7", false).await;

        let response = app
            .clone()
            .oneshot(get_with("/api/auth/me", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user"]["username"], "U7");
        assert_eq!(body["role"], "member");

        let bad = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({"platform": "slack", "teamId": "T1", "userId": "U7", "userToken": "guess"}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_only_admins_create_policies() {
        let (app, h) = app().await;
        let policy = json!({"kind": "platform", "name": "Pins need a vote", "actionTypes": ["slackpinmessage"]});

        let member = login(&app, &h, "U7", false).await;
        let response = app
            .clone()
            .oneshot(post_json("/api/policies", policy.clone(), Some(&member)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let admin = login(&app, &h, "U8", true).await;
        let response = app
            .clone()
            .oneshot(post_json("/api/policies", policy, Some(&admin)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(get_with("/api/policies", Some(&member)))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sandbox_violation_rejected() {
        let (app, h) = app().await;
        let admin = login(&app, &h, "U8", true).await;
        let response = app
            .oneshot(post_json(
                "/api/policies",
                json!({"kind": "platform", "name": "Sneaky", "steps": {"check": "import os"}}),
                Some(&admin),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "SANDBOX_VIOLATION");
    }

    #[tokio::test]
    async fn test_refresh_reflects_demotion() {
        let (app, h) = app().await;
        let secret = Settings::default().auth.jwt_secret;
        let (mut user, _) = h
            .governance
            .communities
            .get_or_create_user(h.platform.id, "U8", None)
            .await
            .unwrap();
        user.is_community_admin = true;
        h.governance.communities.save_user(user.clone()).await;
        let pair = crate::auth::create_tokens(&secret, &crate::auth::Claims::for_user(&user, &h.platform)).unwrap();

        user.is_community_admin = false;
        h.governance.communities.save_user(user).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/refresh",
                json!({"refreshToken": pair.refresh_token}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let access = json_body(response).await["tokens"]["accessToken"]
            .as_str()
            .unwrap()
            .to_string();
        let claims = crate::auth::decode_token(&secret, &access).unwrap();
        assert_eq!(claims.role, crate::auth::Role::Member);

        let response = app
            .oneshot(post_json(
                "/api/policies",
                json!({"kind": "platform", "name": "Quiet"}),
                Some(&access),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_forced_slack_login() {
        let mut settings = Settings::default();
        settings.auth.force_login = Some("Ada Lovelace".to_string());
        let (app, h) = app_with(settings, FakeBroker::default()).await;
        h.governance
            .communities
            .get_or_create_user(h.platform.id, "U9", Some("Ada Lovelace"))
            .await
            .unwrap();

        let response = app.oneshot(get_with("/api/auth/me", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["user"]["username"], "U9");
    }

    #[tokio::test]
    async fn test_outcome_callback_decides_proposal() {
        let broker = FakeBroker::with_process(pending("slack.emoji-vote", json!({"message_ts": "99.1"})));
        let (app, h) = app_with(Settings::default(), broker).await;

        let response = app
            .clone()
            .oneshot(post_json("/slack/action", message_event("Ev3"), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        let id = body["data"]["proposals"][0]["id"].as_str().unwrap().to_string();
        let proposal_id = id.parse().unwrap();
        h.governance
            .initiate_vote(proposal_id, None, None)
            .await
            .unwrap();

        let response = app
            .oneshot(post_json(
                &format!("/metagov/internal/outcome/{}", id),
                json!({"status": "completed", "outcome": votes(&["U1", "U2"], &["U3"])}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["status"], "passed");

        // taken down on arrival, posted once on pass
        settled(&h.governance, proposal_id).await;
        assert_eq!(methods(&h.calls), ["chat.delete", "chat.postMessage"]);
    }

    async fn issue_state(app: &Router, platform: &str, token: Option<&str>) -> String {
        let response = app
            .clone()
            .oneshot(get_with(&format!("/{}/authorize", platform), token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["data"]["state"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Fake Slack token endpoint that accepts the code "good"
    async fn spawn_token_server() -> String {
        let app = Router::new().route(
            "/oauth.v2.access",
            post(|axum::Form(form): axum::Form<std::collections::HashMap<String, String>>| async move {
                if form.get("code").map(String::as_str) != Some("good") {
                    return axum::Json(json!({"ok": false, "error": "invalid_code"}));
                }
                axum::Json(json!({
                    "ok": true,
                    "access_token": "xoxb-t9",
                    "bot_user_id": "UBOT9",
                    "team": {"id": "T9", "name": "Nine"},
                    "authed_user": {"id": "U90", "access_token": "xoxp-u90"}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/oauth.v2.access", addr)
    }

    #[tokio::test]
    async fn test_install_requires_issued_state() {
        let (app, _) = app().await;
        for body in [json!({"team_id": 77, "state": "forged"}), json!({"team_id": 77})] {
            let response = app
                .clone()
                .oneshot(post_json("/github/install", body, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let nonce = issue_state(&app, "github", None).await;
        let response = app
            .clone()
            .oneshot(post_json("/github/install", json!({"team_id": 77, "state": nonce}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // single use
        let response = app
            .oneshot(post_json("/github/install", json!({"team_id": 78, "state": nonce}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oauth_ignores_client_supplied_grant() {
        let (app, h) = app().await;
        let grant = json!({
            "ok": true,
            "access_token": "xoxb-forged",
            "team": {"id": "T1", "name": "Acme"},
            "authed_user": {"id": "EVE", "access_token": "xoxp-eve"}
        });

        let response = app
            .clone()
            .oneshot(post_json("/slack/oauth", grant.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut with_state = grant;
        with_state["state"] = json!(issue_state(&app, "slack", None).await);
        let response = app
            .oneshot(post_json("/slack/oauth", with_state, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let record = h.governance.communities.get_platform(h.platform.id).await.unwrap();
        assert_eq!(record.credentials.access_token.as_deref(), Some("xoxb-bot"));
        assert!(h.governance.communities.find_user(h.platform.id, "EVE").await.is_none());
    }

    #[tokio::test]
    async fn test_oauth_code_is_exchanged_on_server() {
        let mut settings = Settings::default();
        settings.oauth.apps.insert(
            crate::community::Platform::Slack,
            crate::config::OAuthApp {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                token_url: Some(spawn_token_server().await),
            },
        );
        let (app, h) = app_with(settings, FakeBroker::default()).await;

        let nonce = issue_state(&app, "slack", None).await;
        let response = app
            .clone()
            .oneshot(get_with(&format!("/slack/oauth?code=bad&state={}", nonce), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let nonce = issue_state(&app, "slack", None).await;
        let response = app
            .oneshot(post_json("/slack/oauth", json!({"code": "good", "state": nonce}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["data"]["platform"]["teamId"], "T9");

        let platform_id = body["data"]["platform"]["id"].as_str().unwrap().parse().unwrap();
        let installer = h.governance.communities.find_user(platform_id, "U90").await.unwrap();
        assert!(installer.is_community_admin);
    }

    #[tokio::test]
    async fn test_relayed_install_cannot_overwrite_team() {
        let (app, h) = app().await;
        let nonce = issue_state(&app, "slack", None).await;
        let response = app
            .oneshot(post_json(
                "/slack/install",
                json!({
                    "state": nonce,
                    "team": {"id": "T1", "name": "Acme"},
                    "access_token": "xoxb-forged",
                    "authed_user": {"id": "EVE"},
                    "api_base": "http://attacker.test/"
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let record = h.governance.communities.get_platform(h.platform.id).await.unwrap();
        assert_eq!(record.api_base, h.platform.api_base);
        assert_eq!(record.credentials.access_token.as_deref(), Some("xoxb-bot"));
    }

    #[tokio::test]
    async fn test_attaching_to_community_requires_its_admin() {
        let (app, h) = app().await;
        let grant = |state: String| {
            json!({"url": "https://forum.acme.org", "api_key": "k", "community": "slack-t1", "state": state})
        };

        let anonymous = issue_state(&app, "discourse", None).await;
        let response = app
            .clone()
            .oneshot(post_json("/discourse/install", grant(anonymous), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let member = login(&app, &h, "U5", false).await;
        let response = app
            .clone()
            .oneshot(get_with("/discourse/authorize", Some(&member)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let admin = login(&app, &h, "U6", true).await;
        let bound = issue_state(&app, "discourse", Some(&admin)).await;
        let response = app
            .oneshot(post_json("/discourse/install", grant(bound), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            json_body(response).await["data"]["communityId"],
            h.platform.community_id.to_string()
        );
    }

    #[tokio::test]
    async fn test_integration_management_requires_community_admin() {
        let (app, h) = app().await;
        let disable = |token: Option<&str>| {
            post_json(
                "/slack/disable_integration_without_deletion",
                json!({"teamId": "T1"}),
                token,
            )
        };

        let response = app.clone().oneshot(disable(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app
            .clone()
            .oneshot(post_json("/reddit/init_community_reddit", json!({"teamId": "r/acme"}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let member = login(&app, &h, "U5", false).await;
        let response = app.clone().oneshot(disable(Some(&member))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // an admin of another community cannot see this integration
        let other = h
            .governance
            .communities
            .install(crate::community::NewInstallation {
                platform: crate::community::Platform::Github,
                team_id: "99".to_string(),
                community_name: "Other".to_string(),
                api_base: String::new(),
                credentials: Default::default(),
                community_id: None,
            })
            .await
            .unwrap();
        let (mut outsider, _) = h
            .governance
            .communities
            .get_or_create_user(other.platform.id, "mallory", None)
            .await
            .unwrap();
        outsider.is_community_admin = true;
        let outsider = h.governance.communities.save_user(outsider).await;
        let pair = crate::auth::create_tokens(
            &Settings::default().auth.jwt_secret,
            &crate::auth::Claims::for_user(&outsider, &other.platform),
        )
        .unwrap();
        let response = app.clone().oneshot(disable(Some(&pair.access_token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let admin = login(&app, &h, "U6", true).await;
        let response = app.oneshot(disable(Some(&admin))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = h.governance.communities.get_platform(h.platform.id).await.unwrap();
        assert!(!record.is_active);
    }
}
