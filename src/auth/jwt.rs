//! JWT token management
//!
//! Handles creation, validation, and refresh of session tokens.

use crate::auth::Role;
use crate::community::{CommunityPlatform, CommunityUser, Platform};
use crate::error::AppError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access token expiration (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Refresh token expiration (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject (community user ID)
    pub sub: Uuid,
    pub username: String,
    pub platform: Platform,
    pub community_platform_id: Uuid,
    /// Parent community the session may govern
    pub community_id: Uuid,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub token_type: TokenType,
}

impl Claims {
    /// Access claims for a user of `platform`
    pub fn for_user(user: &CommunityUser, platform: &CommunityPlatform) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id,
            username: user.username.clone(),
            platform: platform.platform,
            community_platform_id: platform.id,
            community_id: platform.community_id,
            role: Role::for_admin_flag(user.is_community_admin),
            exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRATION_MINUTES)).timestamp(),
            iat: now.timestamp(),
            token_type: TokenType::Access,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Token pair response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Create access and refresh tokens from access claims
pub fn create_tokens(secret: &str, claims: &Claims) -> Result<TokenPair, AppError> {
    let now = Utc::now();
    let key = EncodingKey::from_secret(secret.as_bytes());

    let access_claims = Claims {
        exp: (now + Duration::minutes(ACCESS_TOKEN_EXPIRATION_MINUTES)).timestamp(),
        iat: now.timestamp(),
        token_type: TokenType::Access,
        ..claims.clone()
    };
    let access_token = encode(&Header::default(), &access_claims, &key)
        .map_err(|e| AppError::Internal(format!("Failed to create access token: {}", e)))?;

    let refresh_claims = Claims {
        exp: (now + Duration::days(REFRESH_TOKEN_EXPIRATION_DAYS)).timestamp(),
        token_type: TokenType::Refresh,
        ..access_claims
    };
    let refresh_token = encode(&Header::default(), &refresh_claims, &key)
        .map_err(|e| AppError::Internal(format!("Failed to create refresh token: {}", e)))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: ACCESS_TOKEN_EXPIRATION_MINUTES * 60,
    })
}

/// Decode and validate a JWT token
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".to_string())
        }
        jsonwebtoken::errors::ErrorKind::InvalidToken => {
            AppError::Unauthorized("Invalid token".to_string())
        }
        _ => AppError::Unauthorized(format!("Token validation failed: {}", e)),
    })?;

    Ok(token_data.claims)
}

/// Validate a refresh token and return its claims
pub fn verify_refresh_token(secret: &str, refresh_token: &str) -> Result<Claims, AppError> {
    let claims = decode_token(secret, refresh_token)?;

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Invalid token type for refresh".to_string()));
    }

    Ok(claims)
}

/// Issue a new pair for the refresh token's subject, re-deriving the role
/// from the current user record
pub fn refresh_tokens(
    secret: &str,
    refresh: &Claims,
    user: &CommunityUser,
    platform: &CommunityPlatform,
) -> Result<TokenPair, AppError> {
    if user.id != refresh.sub || platform.id != user.community_platform_id {
        return Err(AppError::Unauthorized("Refresh token does not match user".to_string()));
    }
    create_tokens(secret, &Claims::for_user(user, platform))
}
