//! Integration management for a community's admins

use crate::auth::{require_role, Claims, Role};
use crate::community::{CommunityPlatform, CommunityPlatformSummary, Platform};
use crate::error::{not_found_error, validation_error, ApiResult, AppError};
use crate::models::SuccessResponse;
use crate::policy::Policy;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitCommunityRequest {
    #[validate(length(min = 1, message = "teamId is required"))]
    pub team_id: String,
    /// Templates to copy; empty copies every template
    #[serde(default)]
    pub template_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DisableRequest {
    #[validate(length(min = 1, message = "teamId is required"))]
    pub team_id: String,
}

/// The session community's integration for `team_id`. Other communities'
/// integrations are reported as missing.
async fn owned_platform(
    state: &SharedState,
    claims: &Claims,
    platform: Platform,
    team_id: &str,
) -> Result<CommunityPlatform, AppError> {
    state
        .governance
        .communities
        .find_platform(platform, team_id)
        .await
        .filter(|record| record.community_id == claims.community_id)
        .ok_or_else(|| not_found_error(format!("No {} integration for team {}", platform, team_id)))
}

/// POST /reddit/init_community_reddit
pub async fn init_community_reddit(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(platform): Path<String>,
    Json(payload): Json<InitCommunityRequest>,
) -> ApiResult<Json<SuccessResponse<Vec<Policy>>>> {
    expect_platform(&platform, Platform::Reddit)?;
    init_community(&state, &claims, Platform::Reddit, payload).await
}

/// POST /discourse/init_community_discourse
pub async fn init_community_discourse(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(platform): Path<String>,
    Json(payload): Json<InitCommunityRequest>,
) -> ApiResult<Json<SuccessResponse<Vec<Policy>>>> {
    expect_platform(&platform, Platform::Discourse)?;
    init_community(&state, &claims, Platform::Discourse, payload).await
}

/// Platform-specific routes share the `/{platform}/...` prefix
fn expect_platform(segment: &str, expected: Platform) -> Result<(), AppError> {
    if segment.parse::<Platform>().ok() == Some(expected) {
        Ok(())
    } else {
        Err(not_found_error(format!("No such route for '{}'", segment)))
    }
}

/// Copy policy templates into a freshly installed community
async fn init_community(
    state: &SharedState,
    claims: &Claims,
    platform: Platform,
    payload: InitCommunityRequest,
) -> ApiResult<Json<SuccessResponse<Vec<Policy>>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    require_role(claims, Role::Admin)?;

    let record = owned_platform(state, claims, platform, &payload.team_id).await?;
    let policies = state
        .governance
        .apply_templates(record.community_id, &payload.template_ids)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Community initialized with {} policies.", policies.len()),
        policies,
    )))
}

/// POST /{platform}/disable_integration_without_deletion
pub async fn disable_integration(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(platform): Path<String>,
    Json(payload): Json<DisableRequest>,
) -> ApiResult<Json<SuccessResponse<CommunityPlatformSummary>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    require_role(&claims, Role::Admin)?;
    let platform: Platform = platform.parse()?;

    let record = owned_platform(&state, &claims, platform, &payload.team_id).await?;
    let record = state.governance.disable_platform(&record).await?;
    Ok(Json(SuccessResponse::with_data(
        "Integration disabled.",
        CommunityPlatformSummary::from(&record),
    )))
}
