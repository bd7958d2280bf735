//! Broker plugin route handlers
//!
//! Reads and actions that go straight through the governance broker's
//! plugins rather than a platform API.

use crate::auth::{require_role, Claims, Role};
use crate::error::{validation_error, ApiResult, AppError};
use crate::integrations::opencollective;
use crate::integrations::sourcecred::{self, CredSubject};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;
use validator::Validate;

#[derive(Debug, Default, Deserialize)]
pub struct CredQuery {
    pub username: Option<String>,
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExpenseCommentRequest {
    #[validate(length(min = 1, message = "Comment text is required"))]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpenseAction {
    Approve,
    Unapprove,
    Reject,
    Pay,
}

impl ExpenseAction {
    fn as_str(&self) -> &'static str {
        match self {
            ExpenseAction::Approve => "APPROVE",
            ExpenseAction::Unapprove => "UNAPPROVE",
            ExpenseAction::Reject => "REJECT",
            ExpenseAction::Pay => "PAY",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProcessExpenseRequest {
    pub action: ExpenseAction,
}

/// Broker slug of the session's community
async fn session_slug(state: &SharedState, claims: &Claims) -> ApiResult<String> {
    let community = state
        .governance
        .communities
        .get_community(claims.community_id)
        .await?;
    community.metagov_slug.ok_or_else(|| {
        AppError::BadRequest("This community is not registered with the governance broker".to_string())
    })
}

/// GET /api/metagov/resources/{name}
///
/// Read a broker plugin resource for the session's community. Query
/// parameters are passed through.
pub async fn get_resource(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(name): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    let slug = session_slug(&state, &claims).await?;
    let params: Vec<(String, String)> = params.into_iter().collect();
    let resource = state.governance.broker.get_resource(&slug, &name, &params).await?;
    Ok(Json(SuccessResponse::with_data("Resource retrieved.", resource)))
}

/// GET /api/sourcecred/cred?username=|id=
pub async fn get_cred(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CredQuery>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    let subject = match (query.username, query.id) {
        (Some(username), None) => CredSubject::Username(username),
        (None, Some(id)) => CredSubject::Id(id),
        _ => return Err(validation_error("Provide exactly one of username or id")),
    };
    let slug = session_slug(&state, &claims).await?;
    let cred = sourcecred::get_cred(state.governance.broker.as_ref(), &slug, &subject).await?;
    Ok(Json(SuccessResponse::with_data("Cred retrieved.", cred)))
}

/// GET /api/sourcecred/total
pub async fn total_cred(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    let slug = session_slug(&state, &claims).await?;
    let total = sourcecred::fetch_total_cred(state.governance.broker.as_ref(), &slug).await?;
    Ok(Json(SuccessResponse::with_data("Total cred retrieved.", total)))
}

/// POST /api/opencollective/expenses/{expense_id}/comment
pub async fn comment_on_expense(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(expense_id): Path<String>,
    Json(payload): Json<ExpenseCommentRequest>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    require_role(&claims, Role::Admin)?;
    let slug = session_slug(&state, &claims).await?;
    let result = opencollective::post_message(
        state.governance.broker.as_ref(),
        &slug,
        &payload.text,
        &expense_id,
    )
    .await?;
    Ok(Json(SuccessResponse::with_data("Comment posted.", result)))
}

/// POST /api/opencollective/expenses/{expense_id}/process
pub async fn process_expense(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(expense_id): Path<String>,
    Json(payload): Json<ProcessExpenseRequest>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    require_role(&claims, Role::Admin)?;
    let slug = session_slug(&state, &claims).await?;
    let result = opencollective::process_expense(
        state.governance.broker.as_ref(),
        &slug,
        &expense_id,
        payload.action.as_str(),
    )
    .await?;
    info!(
        "{} sent {} for expense {}",
        claims.username,
        payload.action.as_str(),
        expense_id
    );
    Ok(Json(SuccessResponse::with_data("Expense processed.", result)))
}
