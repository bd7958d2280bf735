//! Authentication route handlers
//!
//! Platform login, token refresh and the current session.

use crate::auth::{create_tokens, refresh_tokens, verify_refresh_token, Claims, LoginRequest, Role, TokenPair};
use crate::community::{CommunityPlatformSummary, CommunityUserSummary};
use crate::error::{validation_error, AppError};
use crate::state::SharedState;
use axum::{
    extract::{Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub user: CommunityUserSummary,
    pub role: Role,
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: CommunityUserSummary,
    pub platform: CommunityPlatformSummary,
    pub role: Role,
}

// ============================================
// Route Handlers
// ============================================

/// POST /api/auth/login
///
/// Authenticate through the platform's backend and receive JWT tokens.
pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let communities = &state.governance.communities;
    let user = state
        .auth_backends
        .authenticate(communities, &req)
        .await
        .ok_or_else(|| {
            AppError::Unauthorized("PolicyKit is not installed for that user and community".to_string())
        })?;
    let platform = communities.get_platform(user.community_platform_id).await?;

    let claims = Claims::for_user(&user, &platform);
    let tokens = create_tokens(state.jwt_secret(), &claims)?;
    info!("{} user {} logged in", platform.platform, user.username);

    Ok(Json(AuthResponse {
        success: true,
        user: CommunityUserSummary::from(&user),
        role: claims.role,
        tokens,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let refresh = verify_refresh_token(state.jwt_secret(), &req.refresh_token)?;
    let communities = &state.governance.communities;
    let user = communities
        .get_user(refresh.sub)
        .await
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    let platform = communities.get_platform(user.community_platform_id).await?;

    let tokens = refresh_tokens(state.jwt_secret(), &refresh, &user, &platform)?;
    Ok(Json(TokenResponse {
        success: true,
        tokens,
    }))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MeResponse>, AppError> {
    let communities = &state.governance.communities;
    let user = communities
        .get_user(claims.sub)
        .await
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    let platform = communities.get_platform(claims.community_platform_id).await?;

    Ok(Json(MeResponse {
        success: true,
        user: CommunityUserSummary::from(&user),
        platform: CommunityPlatformSummary::from(&platform),
        role: claims.role,
    }))
}
