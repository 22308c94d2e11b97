//! Withdrawal lifecycle handlers (user side)

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use validator::Validate;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CancelQuery, CreateWithdrawalRequest, VerifyAction, VerifyResponse,
    VerifyWithdrawalRequest, created, ok,
};
use crate::funding::{CreatedWithdrawal, WithdrawalRequest, WithdrawalStatus, WithdrawalView};

const DEFAULT_CANCEL_REASON: &str = "cancelled by user";

/// Create a withdrawal: reserves `amount` and sends a verification code
#[utoipa::path(
    post,
    path = "/api/v1/withdrawals",
    request_body = CreateWithdrawalRequest,
    responses(
        (status = 201, description = "Withdrawal created, code sent", body = CreatedWithdrawal),
        (status = 400, description = "Validation failed or insufficient balance")
    ),
    security(("bearer_jwt" = [])),
    tag = "Withdrawals"
)]
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> ApiResult<CreatedWithdrawal> {
    req.validate().map_err(ApiError::from)?;
    let request = WithdrawalRequest {
        user_id: user.user_id,
        currency: req.currency,
        chain: req.chain,
        amount: req.amount,
        to_address: req.to_address,
        memo: req.memo,
    };
    let withdrawal = state
        .withdrawals
        .create_withdrawal_request(&request)
        .await
        .map_err(ApiError::from)?;
    created(withdrawal)
}

/// Verify the emailed code, or request a new one with `action: "resend"`
#[utoipa::path(
    post,
    path = "/api/v1/withdrawals/verify",
    request_body = VerifyWithdrawalRequest,
    responses(
        (status = 200, description = "Verified, or new code issued", body = VerifyResponse),
        (status = 400, description = "Invalid, expired or used code"),
        (status = 429, description = "Resend rate limited")
    ),
    security(("bearer_jwt" = [])),
    tag = "Withdrawals"
)]
pub async fn verify_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<VerifyWithdrawalRequest>,
) -> ApiResult<VerifyResponse> {
    req.validate().map_err(ApiError::from)?;
    match (req.action, req.code.as_deref()) {
        (Some(VerifyAction::Resend), _) => {
            let expires_at = state
                .withdrawals
                .resend_code(&req.withdrawal_id, user.user_id)
                .await
                .map_err(ApiError::from)?;
            ok(VerifyResponse {
                withdrawal_id: req.withdrawal_id,
                status: WithdrawalStatus::Pending,
                code_expires_at: Some(expires_at),
            })
        }
        (None, Some(code)) => {
            let withdrawal = state
                .withdrawals
                .verify_code(&req.withdrawal_id, code, user.user_id)
                .await
                .map_err(ApiError::from)?;
            ok(VerifyResponse {
                withdrawal_id: withdrawal.withdrawal_id,
                status: withdrawal.status,
                code_expires_at: None,
            })
        }
        (None, None) => ApiError::bad_request("code is required").into_err(),
    }
}

/// Cancel a withdrawal that has not been broadcast
#[utoipa::path(
    delete,
    path = "/api/v1/withdrawals/{withdrawal_id}",
    params(
        ("withdrawal_id" = String, Path, description = "Withdrawal id"),
        CancelQuery
    ),
    responses(
        (status = 200, description = "Cancelled, funds released", body = WithdrawalView),
        (status = 409, description = "Already broadcast or terminal")
    ),
    security(("bearer_jwt" = [])),
    tag = "Withdrawals"
)]
pub async fn cancel_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(withdrawal_id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<WithdrawalView> {
    let reason = query
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_CANCEL_REASON);
    state
        .withdrawals
        .cancel(&withdrawal_id, user.user_id, reason)
        .await
        .map_err(ApiError::from)?;
    let view = state
        .withdrawals
        .get(&withdrawal_id, user.user_id)
        .await
        .map_err(ApiError::from)?;
    ok(view)
}

/// Withdrawal by id
#[utoipa::path(
    get,
    path = "/api/v1/withdrawals/{withdrawal_id}",
    params(
        ("withdrawal_id" = String, Path, description = "Withdrawal id")
    ),
    responses(
        (status = 200, description = "Withdrawal", body = WithdrawalView),
        (status = 404, description = "Not found")
    ),
    security(("bearer_jwt" = [])),
    tag = "Withdrawals"
)]
pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<WithdrawalView> {
    ok(state
        .withdrawals
        .get(&withdrawal_id, user.user_id)
        .await
        .map_err(ApiError::from)?)
}

/// Latest withdrawals of the caller
#[utoipa::path(
    get,
    path = "/api/v1/withdrawals/history",
    responses(
        (status = 200, description = "Withdrawals, newest first", body = Vec<WithdrawalView>)
    ),
    security(("bearer_jwt" = [])),
    tag = "Withdrawals"
)]
pub async fn get_withdrawal_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<WithdrawalView>> {
    ok(state
        .withdrawals
        .history(user.user_id)
        .await
        .map_err(ApiError::from)?)
}
