//! Chain registry handler

use std::sync::Arc;

use axum::extract::State;

use super::super::state::AppState;
use super::super::types::{ApiResult, ChainInfo, ok};

/// Supported chains with confirmations, block time and per-token fees
#[utoipa::path(
    get,
    path = "/api/v1/chains",
    responses(
        (status = 200, description = "Chain registry", body = Vec<ChainInfo>)
    ),
    tag = "Chains"
)]
pub async fn get_chains(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ChainInfo>> {
    ok(state.registry.chains().map(ChainInfo::from).collect())
}
