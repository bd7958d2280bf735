//! Policy route handlers
//!
//! Community policies are visible to members and edited by admins. Templates
//! are readable by everyone.

use crate::auth::{require_role, Claims, Role};
use crate::db::Table;
use crate::error::{validation_error, ApiResult, AppError};
use crate::models::SuccessResponse;
use crate::policy::{Policy, PolicyFilter, PolicyKind, PolicySteps};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyQuery {
    pub kind: Option<PolicyKind>,
    /// List templates instead of the community's policies
    #[serde(default)]
    pub templates: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub kind: PolicyKind,
    #[validate(length(min = 1, max = 255, message = "Policy name must be 1-255 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub action_types: Vec<String>,
    #[serde(default)]
    pub steps: PolicySteps,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyRequest {
    #[validate(length(min = 1, max = 255, message = "Policy name must be 1-255 characters"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub action_types: Option<Vec<String>>,
    pub steps: Option<PolicySteps>,
}

/// Fetch a policy the session may see
async fn visible_policy(state: &SharedState, claims: &Claims, id: Uuid) -> ApiResult<Policy> {
    let policy = state.governance.policies.get(id).await?;
    if policy.is_template || policy.community_id == Some(claims.community_id) {
        Ok(policy)
    } else {
        Err(AppError::NotFound(format!("Policy {} not found", id)))
    }
}

/// Fetch a community policy the session may change
async fn owned_policy(state: &SharedState, claims: &Claims, id: Uuid) -> ApiResult<Policy> {
    require_role(claims, Role::Admin)?;
    let policy = visible_policy(state, claims, id).await?;
    if policy.is_template {
        return Err(AppError::Forbidden("Templates cannot be edited".to_string()));
    }
    Ok(policy)
}

/// GET /api/policies
pub async fn list_policies(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Policy>>>> {
    let filter = PolicyFilter {
        community_id: (!query.templates).then_some(claims.community_id),
        kind: query.kind,
        is_template: Some(query.templates),
    };
    let policies = state.governance.policies.list(&filter).await;
    debug!("Listed {} policies for community {}", policies.len(), claims.community_id);

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} policies.", policies.len()),
        policies,
    )))
}

/// POST /api/policies
pub async fn create_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreatePolicyRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Policy>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    require_role(&claims, Role::Admin)?;

    let mut policy = Policy::new(payload.kind, payload.name, Some(claims.community_id));
    policy.description = payload.description;
    policy.action_types = payload.action_types;
    policy.steps = payload.steps;
    policy.is_active = payload.is_active.unwrap_or(true);

    let governance = &state.governance;
    let policy = governance.policies.save(policy).await?;
    governance.db.save(Table::Policies, policy.id, &policy).await;
    info!("Policy '{}' created by {}", policy.name, claims.username);

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Policy created successfully.", policy)),
    ))
}

/// GET /api/policies/{id}
pub async fn get_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Policy>>> {
    let policy = visible_policy(&state, &claims, id).await?;
    Ok(Json(SuccessResponse::with_data("Policy retrieved.", policy)))
}

/// PUT /api/policies/{id}
pub async fn update_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePolicyRequest>,
) -> ApiResult<Json<SuccessResponse<Policy>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let mut policy = owned_policy(&state, &claims, id).await?;

    if let Some(name) = payload.name {
        policy.name = name;
    }
    if payload.description.is_some() {
        policy.description = payload.description;
    }
    if let Some(action_types) = payload.action_types {
        policy.action_types = action_types;
    }
    if let Some(steps) = payload.steps {
        policy.steps = steps;
    }

    let governance = &state.governance;
    let policy = governance.policies.save(policy).await?;
    governance.db.save(Table::Policies, policy.id, &policy).await;

    Ok(Json(SuccessResponse::with_data("Policy updated successfully.", policy)))
}

/// DELETE /api/policies/{id}
pub async fn delete_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<()>>> {
    let policy = owned_policy(&state, &claims, id).await?;
    let governance = &state.governance;
    governance.policies.delete(policy.id).await?;
    governance.db.remove(Table::Policies, policy.id).await;
    info!("Policy '{}' deleted by {}", policy.name, claims.username);

    Ok(Json(SuccessResponse::message_only("Policy deleted successfully.")))
}

/// POST /api/policies/{id}/activate
pub async fn activate_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Policy>>> {
    set_active(&state, &claims, id, true).await
}

/// POST /api/policies/{id}/deactivate
pub async fn deactivate_policy(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Policy>>> {
    set_active(&state, &claims, id, false).await
}

async fn set_active(
    state: &SharedState,
    claims: &Claims,
    id: Uuid,
    is_active: bool,
) -> ApiResult<Json<SuccessResponse<Policy>>> {
    owned_policy(state, claims, id).await?;
    let governance = &state.governance;
    let policy = governance.policies.set_active(id, is_active).await?;
    governance.db.save(Table::Policies, policy.id, &policy).await;

    let message = if is_active {
        "Policy activated."
    } else {
        "Policy deactivated."
    };
    Ok(Json(SuccessResponse::with_data(message, policy)))
}
