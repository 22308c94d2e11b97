//! Internal handlers: scheduler trigger (cron secret) and admin actions
//! (admin secret)

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    AdminWithdrawalAction, ApiError, ApiResult, ManualDepositRequest, RegisterAddressRequest,
    ScanRequest, UpdateWithdrawalRequest, created, ok,
};
use crate::funding::{Deposit, DepositAddress, ManualDeposit, Withdrawal};
use crate::scheduler::SweepReport;
use crate::sentinel::{ChainCycleReport, ScannerError};

/// Run one scan + confirmation cycle for `chain`, or for every chain
#[utoipa::path(
    post,
    path = "/internal/scan",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Per-chain cycle reports", body = Vec<ChainCycleReport>),
        (status = 400, description = "Unknown chain or no scanner for it")
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn trigger_scan(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScanRequest>>,
) -> ApiResult<Vec<ChainCycleReport>> {
    let chain = body
        .and_then(|Json(req)| req.chain)
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());
    match state.jobs.cycle(chain.as_deref()).await {
        Ok(reports) => ok(reports),
        Err(e @ (ScannerError::Chain(_) | ScannerError::NoScanner(_))) => {
            ApiError::bad_request(e.to_string()).into_err()
        }
        Err(e) => ApiError::internal(e).into_err(),
    }
}

/// Expire timed-out withdrawals and drain the notification outbox
#[utoipa::path(
    post,
    path = "/internal/sweep",
    responses(
        (status = 200, description = "Sweep report", body = SweepReport)
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn trigger_sweep(State(state): State<Arc<AppState>>) -> ApiResult<SweepReport> {
    ok(state.jobs.sweep(Utc::now()).await)
}

/// Broadcaster callbacks: process, record the broadcast hash, complete or
/// fail a withdrawal
#[utoipa::path(
    patch,
    path = "/internal/withdrawals/{withdrawal_id}",
    params(
        ("withdrawal_id" = String, Path, description = "Withdrawal id")
    ),
    request_body = UpdateWithdrawalRequest,
    responses(
        (status = 200, description = "Updated withdrawal", body = Withdrawal),
        (status = 409, description = "Illegal state transition")
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn update_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
    Json(req): Json<UpdateWithdrawalRequest>,
) -> ApiResult<Withdrawal> {
    req.validate().map_err(ApiError::from)?;
    let withdrawals = &state.withdrawals;
    let result = match req.action {
        AdminWithdrawalAction::Process => {
            withdrawals
                .process(&withdrawal_id, req.tx_hash.as_deref())
                .await
        }
        AdminWithdrawalAction::Broadcast => {
            let Some(tx_hash) = req.tx_hash.as_deref() else {
                return ApiError::bad_request("tx_hash is required to record a broadcast")
                    .into_err();
            };
            withdrawals.record_broadcast(&withdrawal_id, tx_hash).await
        }
        AdminWithdrawalAction::Complete => {
            withdrawals.complete(&withdrawal_id, req.confirmations).await
        }
        AdminWithdrawalAction::Fail => {
            let Some(reason) = req.reason.as_deref() else {
                return ApiError::bad_request("reason is required to fail a withdrawal").into_err();
            };
            withdrawals.fail(&withdrawal_id, reason).await
        }
    };
    ok(result.map_err(ApiError::from)?)
}

/// Administrative credit; the tx hash guards against double credit
#[utoipa::path(
    post,
    path = "/internal/deposits/manual",
    request_body = ManualDepositRequest,
    responses(
        (status = 201, description = "Deposit credited", body = Deposit),
        (status = 409, description = "Transaction already recorded")
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn create_manual_deposit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualDepositRequest>,
) -> ApiResult<Deposit> {
    req.validate().map_err(ApiError::from)?;
    let request = ManualDeposit {
        user_id: req.user_id,
        chain: req.chain,
        currency: req.currency,
        tx_hash: req.tx_hash,
        to_address: req.to_address,
        from_address: req.from_address,
        amount: req.amount,
        block_number: req.block_number,
    };
    let deposit = state
        .deposits
        .create_manual_deposit(&request)
        .await
        .map_err(ApiError::from)?;
    created(deposit)
}

/// Register a deposit address for a user; the scanner watches it from the
/// next cycle
#[utoipa::path(
    post,
    path = "/internal/addresses",
    request_body = RegisterAddressRequest,
    responses(
        (status = 201, description = "Address registered", body = DepositAddress),
        (status = 409, description = "Address owned by another user")
    ),
    security(("internal_secret" = [])),
    tag = "Internal"
)]
pub async fn register_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterAddressRequest>,
) -> ApiResult<DepositAddress> {
    req.validate().map_err(ApiError::from)?;
    let address = state
        .deposits
        .register_address(req.user_id, &req.chain, &req.address)
        .await
        .map_err(ApiError::from)?;
    created(address)
}
