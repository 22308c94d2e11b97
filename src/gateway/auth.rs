//! Request authentication
//!
//! - User routes: `Authorization: Bearer <jwt>` (HS256, `sub` = user id)
//! - Internal routes: `X-Internal-Secret` header, one secret for admin
//!   actions and one for the scheduler trigger

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::state::AppState;
use super::types::{ApiError, ApiResponse, error_codes};
use crate::core_types::{UserId, secrets_match};

pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID
    pub exp: usize,  // Expiration time (as UTC timestamp)
    pub iat: usize,  // Issued at
}

/// Caller identity injected by `jwt_auth_middleware`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
}

/// Issue a token for `user_id`. Tokens are minted by the account service in
/// production; this is used by tooling and tests.
pub fn sign_token(
    secret: &str,
    user_id: UserId,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + ttl_secs).max(0) as usize,
        iat: now.max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(secret: &str, token: &str) -> Result<AuthUser, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
    let user_id = data
        .claims
        .sub
        .parse::<UserId>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::unauthorized("Invalid user ID in token"))?;
    Ok(AuthUser { user_id })
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    // 1. Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(
                error_codes::MISSING_AUTH,
                "Missing Authorization header",
            )),
        ))?;

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized("Invalid token format").into());
    };

    // 2. Verify token, 3. inject caller
    let user = verify_token(&state.security.jwt_secret, token.trim())?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn check_internal_secret(headers: &HeaderMap, expected: &str, scope: &str) -> Result<(), ApiError> {
    let given = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                error_codes::MISSING_AUTH,
                "Missing X-Internal-Secret header",
            )
        })?;
    if expected.is_empty() || !secrets_match(expected, given) {
        warn!(scope, "Rejected internal request with a bad secret");
        return Err(ApiError::forbidden("Invalid internal secret"));
    }
    Ok(())
}

/// Admin routes: manual credit, address registration, withdrawal actions
pub async fn admin_secret_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    check_internal_secret(request.headers(), &state.security.admin_secret, "admin")?;
    Ok(next.run(request).await)
}

/// Scheduler trigger routes
pub async fn cron_secret_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    check_internal_secret(request.headers(), &state.security.cron_secret, "cron")?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_round_trip() {
        let token = sign_token("s3cret", 42, 60).unwrap();
        assert_eq!(verify_token("s3cret", &token).unwrap().user_id, 42);
        assert!(verify_token("other", &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // past the default 60s leeway
        let token = sign_token("s3cret", 42, -600).unwrap();
        let err = verify_token("s3cret", &token).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_secret_check() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            check_internal_secret(&headers, "admin", "admin").unwrap_err().code,
            error_codes::MISSING_AUTH
        );
        headers.insert(INTERNAL_SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert_eq!(
            check_internal_secret(&headers, "admin", "admin").unwrap_err().status,
            StatusCode::FORBIDDEN
        );
        headers.insert(INTERNAL_SECRET_HEADER, HeaderValue::from_static("admin"));
        assert!(check_internal_secret(&headers, "admin", "admin").is_ok());
        // an unset secret never matches
        headers.insert(INTERNAL_SECRET_HEADER, HeaderValue::from_static(""));
        assert!(check_internal_secret(&headers, "", "admin").is_err());
    }
}
