//! Account handlers (balances, deposit addresses)

use std::sync::Arc;

use axum::{Extension, extract::State};

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, BalanceData, ok};
use crate::funding::DepositAddress;

/// Balances of the caller, one row per (currency, chain)
#[utoipa::path(
    get,
    path = "/api/v1/balances",
    responses(
        (status = 200, description = "Balances", body = Vec<BalanceData>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_jwt" = [])),
    tag = "Account"
)]
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<BalanceData>> {
    let balances = state
        .ledger
        .balances(user.user_id)
        .await
        .map_err(ApiError::internal)?;
    ok(balances.iter().map(BalanceData::from).collect())
}

/// Deposit addresses registered to the caller
#[utoipa::path(
    get,
    path = "/api/v1/addresses",
    responses(
        (status = 200, description = "Deposit addresses", body = Vec<DepositAddress>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_jwt" = [])),
    tag = "Account"
)]
pub async fn get_addresses(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<DepositAddress>> {
    let addresses = state
        .deposits
        .addresses(user.user_id)
        .await
        .map_err(ApiError::from)?;
    ok(addresses)
}
