//! HTTP Gateway
//!
//! - Public: `/health`, `/api/v1/chains`
//! - User (JWT): `/api/v1/balances`, `/api/v1/addresses`, `/api/v1/deposits*`,
//!   `/api/v1/withdrawals*`
//! - Internal (`X-Internal-Secret`): `/internal/scan`, `/internal/sweep` with
//!   the cron secret; withdrawal actions, manual credit and address
//!   registration with the admin secret

pub mod auth;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // Public Routes (no auth required)
    // ==========================================================================
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/chains", get(handlers::get_chains));

    // ==========================================================================
    // User Routes - Protected by JWT
    // ==========================================================================
    let user_routes = Router::new()
        .route("/api/v1/balances", get(handlers::get_balances))
        .route("/api/v1/addresses", get(handlers::get_addresses))
        .route("/api/v1/deposits", get(handlers::query_deposits))
        .route("/api/v1/deposits/history", get(handlers::get_deposit_history))
        .route("/api/v1/deposits/{deposit_id}", get(handlers::get_deposit))
        .route("/api/v1/withdrawals", post(handlers::create_withdrawal))
        .route("/api/v1/withdrawals/verify", post(handlers::verify_withdrawal))
        .route(
            "/api/v1/withdrawals/history",
            get(handlers::get_withdrawal_history),
        )
        .route(
            "/api/v1/withdrawals/{withdrawal_id}",
            get(handlers::get_withdrawal).delete(handlers::cancel_withdrawal),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    // ==========================================================================
    // Internal Routes - shared secrets
    // ==========================================================================
    let cron_routes = Router::new()
        .route("/internal/scan", post(handlers::trigger_scan))
        .route("/internal/sweep", post(handlers::trigger_sweep))
        .route_layer(from_fn_with_state(
            state.clone(),
            auth::cron_secret_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/internal/withdrawals/{withdrawal_id}",
            patch(handlers::update_withdrawal),
        )
        .route(
            "/internal/deposits/manual",
            post(handlers::create_manual_deposit),
        )
        .route("/internal/addresses", post(handlers::register_address))
        .route_layer(from_fn_with_state(
            state.clone(),
            auth::admin_secret_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(cron_routes)
        .merge(admin_routes)
        .with_state(state)
        // OpenAPI / Swagger UI (stateless, added after with_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Gateway listening");
    info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, app).await
}
