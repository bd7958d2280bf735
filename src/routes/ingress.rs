//! Platform ingress route handlers
//!
//! OAuth/install completion, webhooks and broker callbacks. These routes are
//! called by platforms and the broker. Only `authorize` looks at a session,
//! to bind an install to the admin's community.

use crate::action::idempotency_key;
use crate::auth::{optional_session, require_role, IssuedState, Role};
use crate::community::Platform;
use crate::error::{not_found_error, validation_error, ApiResult, AppError};
use crate::governance::{GrantSource, InstallReport, Submission};
use crate::integrations::{lookup_str, Inbound};
use crate::metagov::{BrokerEvent, ProcessData};
use crate::models::SuccessResponse;
use crate::policy::PolicyError;
use crate::proposal::Proposal;
use crate::state::SharedState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

type InstallResponse = ApiResult<(StatusCode, Json<SuccessResponse<InstallReport>>)>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub platform: Platform,
    pub state: String,
    /// Community the install will attach to
    pub community_id: Option<Uuid>,
}

/// Where the platform sends the user back after consent
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCallback {
    #[serde(default)]
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,
    pub state: Option<String>,
    #[serde(alias = "redirect_uri")]
    pub redirect_uri: Option<String>,
}

fn parse_json(body: &Bytes) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// GET /{platform}/authorize
///
/// Start an OAuth flow: hands out the `state` nonce to send to the platform.
/// An admin session binds the nonce to the admin's community.
pub async fn authorize(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> ApiResult<Json<SuccessResponse<AuthorizeResponse>>> {
    let platform: Platform = platform.parse()?;
    state.governance.adapters.get(platform)?;

    let community_id = match optional_session(state.jwt_secret(), bearer)? {
        Some(claims) => {
            require_role(&claims, Role::Admin)?;
            Some(claims.community_id)
        }
        None => None,
    };
    let nonce = state.oauth_states.issue(community_id).await;
    Ok(Json(SuccessResponse::with_data(
        "OAuth state issued.",
        AuthorizeResponse {
            platform,
            state: nonce,
            community_id,
        },
    )))
}

async fn consume_state(state: &SharedState, nonce: Option<&str>) -> Result<IssuedState, AppError> {
    let nonce = nonce
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Unauthorized("OAuth state is required".to_string()))?;
    state
        .oauth_states
        .consume(nonce)
        .await
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired OAuth state".to_string()))
}

/// GET /{platform}/oauth
///
/// Browser redirect from the platform with `code` and `state` in the query.
pub async fn oauth_redirect(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> InstallResponse {
    exchange_install(&state, &platform, callback).await
}

/// POST /{platform}/oauth
pub async fn oauth(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    Json(callback): Json<OAuthCallback>,
) -> InstallResponse {
    exchange_install(&state, &platform, callback).await
}

/// Exchange the code with the platform and install from its token response
async fn exchange_install(state: &SharedState, platform: &str, callback: OAuthCallback) -> InstallResponse {
    let platform: Platform = platform.parse()?;
    let issued = consume_state(state, callback.state.as_deref()).await?;
    callback.validate().map_err(|e| validation_error(e.to_string()))?;

    let adapter = state.governance.adapters.get(platform)?;
    let grant = state
        .oauth_exchange
        .exchange(
            platform,
            adapter.oauth_token_url(),
            &callback.code,
            callback.redirect_uri.as_deref(),
        )
        .await?;
    complete_install(state, platform, &grant, issued.community_id, GrantSource::Exchanged).await
}

/// POST /{platform}/install
///
/// Install from a grant relayed by the broker after its own OAuth flow. The
/// grant can only create a platform. Naming a parent community in
/// `community` requires a `state` issued to one of its admins.
pub async fn install(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    Json(payload): Json<Value>,
) -> InstallResponse {
    let platform: Platform = platform.parse()?;
    let issued = consume_state(&state, lookup_str(&payload, "state")).await?;

    let community_id = match lookup_str(&payload, "community") {
        Some(slug) => {
            let community = state
                .governance
                .communities
                .find_by_metagov_slug(slug)
                .await
                .ok_or_else(|| not_found_error(format!("No community registered as '{}'", slug)))?;
            if issued.community_id != Some(community.id) {
                return Err(AppError::Forbidden(format!(
                    "OAuth state was not issued to an admin of '{}'",
                    slug
                )));
            }
            Some(community.id)
        }
        None => issued.community_id,
    };

    complete_install(&state, platform, &payload, community_id, GrantSource::Relayed).await
}

async fn complete_install(
    state: &SharedState,
    platform: Platform,
    grant: &Value,
    community_id: Option<Uuid>,
    source: GrantSource,
) -> InstallResponse {
    let report = state
        .governance
        .install_platform(platform, grant, community_id, source)
        .await?;
    info!(
        "{} installation for team {} complete (community {})",
        platform, report.platform.team_id, report.community_id
    );

    let status = if report.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SuccessResponse::with_data("Installation complete.", report)),
    ))
}

/// POST /{platform}/action
///
/// Platform webhook. Always answers quickly; governance happens out of band.
pub async fn action(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let platform: Platform = platform.parse()?;
    let payload = parse_json(&body)?;
    let governance = &state.governance;
    let adapter = governance.adapters.get(platform)?;

    if let Some(challenge) = adapter.challenge(&payload) {
        debug!("Answering {} url verification", platform);
        return Ok(Json(json!({ "challenge": challenge })).into_response());
    }

    let team_id = adapter
        .team_id(&headers, &payload)
        .ok_or_else(|| AppError::BadRequest(format!("{} webhook has no team id", platform)))?;
    let record = governance
        .communities
        .find_platform(platform, &team_id)
        .await
        .ok_or_else(|| not_found_error(format!("No {} integration for team {}", platform, team_id)))?;

    match adapter.normalize(&record, &headers, &payload)? {
        Inbound::Ignored(reason) => {
            debug!("Ignoring {} webhook: {}", platform, reason);
            Ok(Json(SuccessResponse::message_only(format!("Ignored: {}", reason))).into_response())
        }
        Inbound::Vote(vote) => {
            let proposals = governance.handle_reaction_vote(&record, vote).await?;
            Ok(Json(SuccessResponse::with_data("Vote recorded.", proposals)).into_response())
        }
        Inbound::Action(normalized) => {
            let delivery_id = adapter.delivery_id(&headers, &payload);
            let key = idempotency_key(delivery_id.as_deref(), &body);
            match governance.submit_action(&record, normalized, key).await {
                Ok(submission) => Ok(submitted(submission)),
                Err(AppError::Policy(PolicyError::NoEligiblePolicy(action_type))) => {
                    warn!("No policy governs {} on {} {}", action_type, platform, team_id);
                    Ok((
                        StatusCode::ACCEPTED,
                        Json(SuccessResponse::message_only(format!(
                            "No policy governs {}.",
                            action_type
                        ))),
                    )
                        .into_response())
                }
                Err(e) => Err(e),
            }
        }
    }
}

fn submitted(submission: Submission) -> Response {
    let (status, message) = if submission.duplicate {
        (StatusCode::OK, "Action already received.")
    } else {
        (StatusCode::ACCEPTED, "Action received.")
    };
    (status, Json(SuccessResponse::with_data(message, submission))).into_response()
}

/// POST /metagov/internal/outcome/{id}
///
/// Broker callback with the latest state of a proposal's process.
pub async fn metagov_outcome(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = state.governance.proposals.get(id).await?;
    let location = proposal
        .governance_process
        .map(|p| p.location)
        .ok_or_else(|| AppError::BadRequest(format!("Proposal {} has no governance process", id)))?;

    let update = ProcessData::from_body(&location, body)
        .map_err(|e| AppError::BadRequest(format!("Invalid process body: {}", e)))?;
    let proposal = state.governance.handle_outcome(id, update).await?;
    Ok(Json(SuccessResponse::with_data("Outcome recorded.", proposal)))
}

/// POST /metagov/internal/action
///
/// Platform event forwarded by the broker (e.g. Open Collective expenses).
pub async fn metagov_action(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Response> {
    let event: BrokerEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid broker event: {}", e)))?;
    let key = idempotency_key(None, &body);

    match state.governance.submit_broker_event(event, key).await? {
        Some(submission) => Ok(submitted(submission)),
        None => Ok(Json(SuccessResponse::message_only("Event ignored.")).into_response()),
    }
}
