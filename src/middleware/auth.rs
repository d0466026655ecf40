use axum::{extract::FromRequestParts, http::header};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::{
    dto::auth::Claims,
    error::{AppError, AppResult},
    models::Role,
    state::AppState,
};

/// Identity resolved from a bearer credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Verify a bearer token and return the identity it names.
pub fn verify(token: &str, secret: &str) -> AppResult<AuthUser> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        AppError::Unauthenticated
    })?;

    let user_id =
        Uuid::parse_str(&decoded.claims.sub).map_err(|_| AppError::Unauthenticated)?;
    let role = decoded
        .claims
        .role
        .parse::<Role>()
        .map_err(|_| AppError::Unauthenticated)?;

    Ok(AuthUser { user_id, role })
}

/// Sign a token for `user_id`. Used by the seed tool and tests.
pub fn issue_token(secret: &str, user_id: Uuid, role: Role, ttl: Duration) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::Unauthenticated)?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthenticated)?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        verify(token, &state.jwt_secret)
    }
}
