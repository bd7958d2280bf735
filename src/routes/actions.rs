//! Governable action route handlers

use crate::action::{ActionKind, ActionStatus, GovernableAction};
use crate::auth::Claims;
use crate::community::CommunityPlatform;
use crate::error::{validation_error, ApiResult, AppError};
use crate::governance::{Submission, CONSTITUTION_ACTIONS};
use crate::integrations::{NormalizedAction, PlatformUser};
use crate::models::SuccessResponse;
use crate::proposal::Proposal;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub status: Option<ActionStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActionRequest {
    #[serde(default = "default_kind")]
    pub kind: ActionKind,
    #[validate(length(min = 1, message = "actionType is required"))]
    pub action_type: String,
    #[serde(default)]
    pub content: Map<String, Value>,
    /// Makes resubmission safe; a random key is used when absent
    pub idempotency_key: Option<String>,
}

fn default_kind() -> ActionKind {
    ActionKind::Constitution
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDetail {
    #[serde(flatten)]
    pub action: GovernableAction,
    pub proposals: Vec<Proposal>,
}

/// The session's platform installation, which must still be active
async fn session_platform(state: &SharedState, claims: &Claims) -> ApiResult<CommunityPlatform> {
    state
        .governance
        .communities
        .get_platform(claims.community_platform_id)
        .await
}

/// Fetch an action from the session's community
pub(super) async fn community_action(
    state: &SharedState,
    claims: &Claims,
    id: Uuid,
) -> ApiResult<GovernableAction> {
    let governance = &state.governance;
    let action = governance.actions.get(id).await?;
    let platform = governance
        .communities
        .get_platform(action.community_platform_id)
        .await?;
    if platform.community_id != claims.community_id {
        return Err(AppError::NotFound(format!("Action {} not found", id)));
    }
    Ok(action)
}

/// Ids of the platform installations in the session's community
pub(super) async fn community_platform_ids(state: &SharedState, claims: &Claims) -> Vec<Uuid> {
    state
        .governance
        .communities
        .list_platforms()
        .await
        .into_iter()
        .filter(|p| p.community_id == claims.community_id)
        .map(|p| p.id)
        .collect()
}

/// GET /api/actions
pub async fn list_actions(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ActionQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<GovernableAction>>>> {
    let platform_ids = community_platform_ids(&state, &claims).await;
    let actions: Vec<_> = state
        .governance
        .actions
        .list(None, query.status)
        .await
        .into_iter()
        .filter(|a| platform_ids.contains(&a.community_platform_id))
        .collect();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} actions.", actions.len()),
        actions,
    )))
}

/// GET /api/actions/{id}
pub async fn get_action(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ActionDetail>>> {
    let action = community_action(&state, &claims, id).await?;
    let proposals = state.governance.proposals.list(Some(action.id), None).await;
    Ok(Json(SuccessResponse::with_data(
        "Action retrieved.",
        ActionDetail { action, proposals },
    )))
}

/// POST /api/actions
///
/// Propose an action through PolicyKit instead of the platform. Constitution
/// actions change the community's policies once passed.
pub async fn submit_action(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitActionRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Submission>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let platform = session_platform(&state, &claims).await?;

    let known = match payload.kind {
        ActionKind::Constitution => CONSTITUTION_ACTIONS.iter().any(|t| *t == payload.action_type),
        ActionKind::Platform => state
            .governance
            .adapters
            .get(platform.platform)?
            .action_types()
            .iter()
            .any(|t| *t == payload.action_type),
        ActionKind::Trigger => false,
    };
    if !known {
        return Err(validation_error(format!(
            "{:?} action '{}' cannot be proposed on {}",
            payload.kind, payload.action_type, platform.platform
        )));
    }

    let normalized = NormalizedAction {
        kind: payload.kind,
        action_type: payload.action_type,
        initiator: Some(PlatformUser::new(claims.username.clone())),
        content: payload.content,
        community_origin: false,
    };
    let key = payload
        .idempotency_key
        .unwrap_or_else(|| format!("api:{}", Uuid::new_v4()));

    let submission = state.governance.submit_action(&platform, normalized, key).await?;
    info!(
        "{} proposed {} action {}",
        claims.username, submission.action.action_type, submission.action.id
    );

    let status = if submission.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(SuccessResponse::with_data("Action submitted.", submission)),
    ))
}
