//! Proposal route handlers
//!
//! Viewing proposals and their votes, starting broker votes, and the admin
//! controls: manual pass/fail, closing a process and triggering execution.

use crate::auth::{require_role, Claims, Role};
use crate::db::Table;
use crate::error::{ApiResult, AppError};
use crate::models::SuccessResponse;
use crate::proposal::{BooleanVote, NumberVote, Proposal, ProposalStatus, Tally};
use crate::routes::actions::{community_action, community_platform_ids};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalQuery {
    pub status: Option<ProposalStatus>,
    pub action_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVoteRequest {
    /// Where to post the vote (channel, repository, topic)
    pub target: Option<String>,
    pub question: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteQuery {
    /// `yes`/`no` for boolean votes, a number for option votes
    pub value: Option<String>,
    /// Comma-separated community user ids
    pub users: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataValue {
    pub value: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalVotes {
    pub boolean_votes: Vec<BooleanVote>,
    pub number_votes: Vec<NumberVote>,
    pub tally: Tally,
}

/// Fetch a proposal from the session's community
async fn community_proposal(state: &SharedState, claims: &Claims, id: Uuid) -> ApiResult<Proposal> {
    let proposal = state.governance.proposals.get(id).await?;
    community_action(state, claims, proposal.action_id)
        .await
        .map_err(|_| AppError::NotFound(format!("Proposal {} not found", id)))?;
    Ok(proposal)
}

/// GET /api/proposals
pub async fn list_proposals(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ProposalQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Proposal>>>> {
    let governance = &state.governance;
    let platform_ids = community_platform_ids(&state, &claims).await;
    let action_ids: Vec<Uuid> = governance
        .actions
        .list(None, None)
        .await
        .into_iter()
        .filter(|a| platform_ids.contains(&a.community_platform_id))
        .map(|a| a.id)
        .collect();

    let proposals: Vec<_> = governance
        .proposals
        .list(query.action_id, query.status)
        .await
        .into_iter()
        .filter(|p| action_ids.contains(&p.action_id))
        .collect();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} proposals.", proposals.len()),
        proposals,
    )))
}

/// GET /api/proposals/{id}
pub async fn get_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    let proposal = community_proposal(&state, &claims, id).await?;
    Ok(Json(SuccessResponse::with_data("Proposal retrieved.", proposal)))
}

/// POST /api/proposals/{id}/vote
pub async fn start_vote(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartVoteRequest>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    community_proposal(&state, &claims, id).await?;
    let proposal = state
        .governance
        .initiate_vote(id, payload.target.as_deref(), payload.question.as_deref())
        .await?;
    info!("{} started a vote on proposal {}", claims.username, id);
    Ok(Json(SuccessResponse::with_data("Vote started.", proposal)))
}

/// POST /api/proposals/{id}/pass
pub async fn pass_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    decide(&state, &claims, id, ProposalStatus::Passed).await
}

/// POST /api/proposals/{id}/fail
pub async fn fail_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    decide(&state, &claims, id, ProposalStatus::Failed).await
}

async fn decide(
    state: &SharedState,
    claims: &Claims,
    id: Uuid,
    status: ProposalStatus,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    require_role(claims, Role::Admin)?;
    community_proposal(state, claims, id).await?;
    let proposal = state.governance.decide(id, status).await?;
    info!("{} marked proposal {} {:?}", claims.username, id, status);
    Ok(Json(SuccessResponse::with_data("Proposal decided.", proposal)))
}

/// POST /api/proposals/{id}/close
pub async fn close_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    require_role(&claims, Role::Admin)?;
    community_proposal(&state, &claims, id).await?;
    let proposal = state.governance.close_process(id).await?;
    Ok(Json(SuccessResponse::with_data("Process closed.", proposal)))
}

/// POST /api/proposals/{id}/refresh
pub async fn refresh_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    community_proposal(&state, &claims, id).await?;
    let proposal = state.governance.refresh_process(id).await?;
    Ok(Json(SuccessResponse::with_data("Process refreshed.", proposal)))
}

/// POST /api/proposals/{id}/execute
pub async fn execute_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Proposal>>> {
    require_role(&claims, Role::Admin)?;
    community_proposal(&state, &claims, id).await?;
    let proposal = state.governance.execute_proposal(id).await?;
    Ok(Json(SuccessResponse::with_data("Action executed.", proposal)))
}

/// GET /api/proposals/{id}/votes
pub async fn list_votes(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Query(query): Query<VoteQuery>,
) -> ApiResult<Json<SuccessResponse<ProposalVotes>>> {
    community_proposal(&state, &claims, id).await?;

    let users = query
        .users
        .as_deref()
        .map(|list| {
            list.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim()
                        .parse::<Uuid>()
                        .map_err(|_| AppError::BadRequest(format!("Invalid user id '{}'", s)))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let (boolean_value, number_value) = match query.value.as_deref() {
        None => (None, None),
        Some("yes") | Some("true") => (Some(true), None),
        Some("no") | Some("false") => (Some(false), None),
        Some(other) => {
            let n = other
                .parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid vote value '{}'", other)))?;
            (None, Some(n))
        }
    };

    let proposals = &state.governance.proposals;
    let boolean_votes = if number_value.is_some() {
        Vec::new()
    } else {
        proposals.boolean_votes(id, boolean_value, users.as_deref()).await
    };
    let number_votes = if boolean_value.is_some() {
        Vec::new()
    } else {
        proposals.number_votes(id, number_value, users.as_deref()).await
    };
    let tally = proposals.tally(id).await;

    Ok(Json(SuccessResponse::with_data(
        "Votes retrieved.",
        ProposalVotes {
            boolean_votes,
            number_votes,
            tally,
        },
    )))
}

/// GET /api/proposals/{id}/data
pub async fn get_data(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Map<String, Value>>>> {
    let proposal = community_proposal(&state, &claims, id).await?;
    Ok(Json(SuccessResponse::with_data(
        "Data retrieved.",
        proposal.data.as_map().clone(),
    )))
}

/// GET /api/proposals/{id}/data/{key}
pub async fn get_data_value(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path((id, key)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<Value>>> {
    let proposal = community_proposal(&state, &claims, id).await?;
    let value = proposal
        .data
        .get(&key)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("No value stored under '{}'", key)))?;
    Ok(Json(SuccessResponse::with_data("Value retrieved.", value)))
}

/// PUT /api/proposals/{id}/data/{key}
pub async fn set_data(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path((id, key)): Path<(Uuid, String)>,
    Json(payload): Json<DataValue>,
) -> ApiResult<Json<SuccessResponse<bool>>> {
    require_role(&claims, Role::Admin)?;
    community_proposal(&state, &claims, id).await?;
    let governance = &state.governance;
    let stored = governance.proposals.data_set(id, key, payload.value).await?;
    let proposal = governance.proposals.get(id).await?;
    governance.db.save(Table::Proposals, proposal.id, &proposal).await;
    Ok(Json(SuccessResponse::with_data("Value stored.", stored)))
}

/// DELETE /api/proposals/{id}/data/{key}
pub async fn remove_data(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path((id, key)): Path<(Uuid, String)>,
) -> ApiResult<Json<SuccessResponse<bool>>> {
    require_role(&claims, Role::Admin)?;
    community_proposal(&state, &claims, id).await?;
    let governance = &state.governance;
    let removed = governance.proposals.data_remove(id, &key).await?;
    if removed {
        let proposal = governance.proposals.get(id).await?;
        governance.db.save(Table::Proposals, proposal.id, &proposal).await;
    }
    Ok(Json(SuccessResponse::with_data(
        if removed { "Value removed." } else { "No such key." },
        removed,
    )))
}
