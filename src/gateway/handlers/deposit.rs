//! Deposit query handlers
//!
//! Callers only ever see their own deposits; somebody else's deposit is
//! reported as not found.

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
};

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, DepositQuery, HistoryQuery, ok};
use crate::funding::{DepositError, DepositView};

/// Deposit by id
#[utoipa::path(
    get,
    path = "/api/v1/deposits/{deposit_id}",
    params(
        ("deposit_id" = String, Path, description = "Deposit id, e.g. DEP20261019000001")
    ),
    responses(
        (status = 200, description = "Deposit", body = DepositView),
        (status = 404, description = "Not found")
    ),
    security(("bearer_jwt" = [])),
    tag = "Deposits"
)]
pub async fn get_deposit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(deposit_id): Path<String>,
) -> ApiResult<DepositView> {
    let view = state.deposits.get(&deposit_id).await.map_err(ApiError::from)?;
    if view.deposit.user_id != user.user_id {
        return ApiError::from(DepositError::NotFound(deposit_id)).into_err();
    }
    ok(view)
}

/// Deposits by transaction hash or by deposit address
#[utoipa::path(
    get,
    path = "/api/v1/deposits",
    params(DepositQuery),
    responses(
        (status = 200, description = "Matching deposits", body = Vec<DepositView>),
        (status = 400, description = "Neither or both of tx_hash and address given")
    ),
    security(("bearer_jwt" = [])),
    tag = "Deposits"
)]
pub async fn query_deposits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DepositQuery>,
) -> ApiResult<Vec<DepositView>> {
    let tx_hash = query.tx_hash.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let address = query.address.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let found = match (tx_hash, address) {
        (Some(tx_hash), None) => match state.deposits.get_by_tx_hash(tx_hash).await {
            Ok(view) => vec![view],
            Err(DepositError::NotFound(_)) => Vec::new(),
            Err(e) => return ApiError::from(e).into_err(),
        },
        (None, Some(address)) => state
            .deposits
            .list_by_address(address)
            .await
            .map_err(ApiError::from)?,
        _ => {
            return ApiError::bad_request("Exactly one of tx_hash or address is required")
                .into_err();
        }
    };
    ok(found
        .into_iter()
        .filter(|v| v.deposit.user_id == user.user_id)
        .collect())
}

/// Latest deposits of the caller
#[utoipa::path(
    get,
    path = "/api/v1/deposits/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Deposits, newest first", body = Vec<DepositView>)
    ),
    security(("bearer_jwt" = [])),
    tag = "Deposits"
)]
pub async fn get_deposit_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<DepositView>> {
    let limit = state.page_size(query.limit);
    ok(state
        .deposits
        .history(user.user_id, limit)
        .await
        .map_err(ApiError::from)?)
}
