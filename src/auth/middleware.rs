//! Authentication middleware
//!
//! Extracts and validates JWT sessions. With `FORCE_SLACK_LOGIN` set, requests
//! without a token are logged in as that Slack user.

use crate::auth::{decode_token, Claims, Role, TokenType};
use crate::community::Platform;
use crate::error::AppError;
use crate::state::SharedState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tracing::{debug, warn};

/// Insert the session's claims into request extensions
pub async fn auth_middleware(
    State(state): State<SharedState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = match bearer {
        Some(TypedHeader(Authorization(bearer))) => access_claims(state.jwt_secret(), bearer.token())?,
        None => match &state.settings.auth.force_login {
            Some(name) => forced_login(&state, name).await?,
            None => {
                return Err(AppError::Unauthorized(
                    "Missing authorization header".to_string(),
                ))
            }
        },
    };

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Session on a route that also serves anonymous callers. A bearer token,
/// when sent, must still be a valid access token.
pub fn optional_session(
    secret: &str,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Option<Claims>, AppError> {
    bearer
        .map(|TypedHeader(Authorization(bearer))| access_claims(secret, bearer.token()))
        .transpose()
}

fn access_claims(secret: &str, token: &str) -> Result<Claims, AppError> {
    let claims = decode_token(secret, token)?;
    if claims.token_type != TokenType::Access {
        return Err(AppError::Unauthorized("Access token required".to_string()));
    }
    Ok(claims)
}

/// Development login as the Slack user with this readable name
async fn forced_login(state: &SharedState, readable_name: &str) -> Result<Claims, AppError> {
    let communities = &state.governance.communities;
    let user = communities
        .find_user_by_readable_name(Platform::Slack, readable_name)
        .await
        .ok_or_else(|| {
            warn!("FORCE_SLACK_LOGIN user '{}' not found", readable_name);
            AppError::Unauthorized("Forced login user not found".to_string())
        })?;
    let platform = communities.get_platform(user.community_platform_id).await?;
    debug!("Forced login as {}", readable_name);
    Ok(Claims::for_user(&user, &platform))
}

/// Require specific role
pub fn require_role(claims: &Claims, required: Role) -> Result<(), AppError> {
    let has_permission = match required {
        Role::Member => true,
        Role::Admin => claims.role.can_govern(),
    };

    if !has_permission {
        return Err(AppError::Forbidden(format!(
            "Requires {} role, you have {}",
            required, claims.role
        )));
    }

    Ok(())
}
