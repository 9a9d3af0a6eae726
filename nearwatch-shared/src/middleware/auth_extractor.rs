use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm};
use std::sync::OnceLock;

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{Claims, Operator, UserRole};

static JWT_SECRET: OnceLock<String> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
#[error("JWT_SECRET must be set to a non-empty value")]
pub struct MissingJwtSecret;

/// Read the token signing secret from `JWT_SECRET`.
pub fn jwt_secret_from_env() -> Result<String, MissingJwtSecret> {
    non_blank_secret(std::env::var("JWT_SECRET").ok())
}

fn non_blank_secret(value: Option<String>) -> Result<String, MissingJwtSecret> {
    value
        .filter(|secret| !secret.trim().is_empty())
        .ok_or(MissingJwtSecret)
}

/// Set the secret every extractor validates against. Only the first call
/// takes effect; returns whether this call did.
pub fn install_jwt_secret(secret: impl Into<String>) -> bool {
    JWT_SECRET.set(secret.into()).is_ok()
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token)?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(Operator::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"))
}

fn validate_jwt(token: &str) -> Result<Claims, AppError> {
    let jwt_secret = JWT_SECRET.get().ok_or_else(|| {
        tracing::error!("token presented before a JWT secret was installed");
        AppError::internal("authentication is not configured")
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })?;

    Ok(token_data.claims)
}

/// Operator if a valid token was presented, anonymous submitter otherwise.
pub struct OptionalOperator(pub Option<Operator>);

impl OptionalOperator {
    pub fn is_admin(&self) -> bool {
        matches!(&self.0, Some(op) if op.role == UserRole::Admin)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalOperator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key("Authorization") {
            return Ok(Self(None));
        }
        // A token that is present but invalid is an error, not an anonymous caller.
        Operator::from_request_parts(parts, state).await.map(|op| Self(Some(op)))
    }
}

/// Require Admin role
pub struct AdminOperator(pub Operator);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminOperator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let operator = Operator::from_request_parts(parts, state).await?;
        if operator.role != UserRole::Admin {
            return Err(AppError::new(ErrorCode::Forbidden, "admin access required"));
        }
        Ok(Self(operator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_missing_secret_is_refused() {
        assert!(non_blank_secret(None).is_err());
        assert!(non_blank_secret(Some("   ".into())).is_err());
        assert_eq!(non_blank_secret(Some("s3cret".into())).unwrap(), "s3cret");
    }
}
