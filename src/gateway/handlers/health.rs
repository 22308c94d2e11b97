//! Health check handler

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
}

/// Health check endpoint
///
/// Pings PostgreSQL when configured, at most once per `CHECK_INTERVAL_MS`;
/// between pings the last result is reused. Internal details are never
/// exposed in the response.
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms}}
/// - Unhealthy: 503 Service Unavailable + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (
            status = 200,
            description = "Service healthy",
            body = HealthResponse,
            content_type = "application/json"
        ),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    static LAST_CHECK_MS: AtomicI64 = AtomicI64::new(0);
    static LAST_OK: AtomicBool = AtomicBool::new(true);
    const CHECK_INTERVAL_MS: i64 = 5000;

    let now_ms = Utc::now().timestamp_millis();

    let healthy = match state.pg_db.as_ref() {
        None => true,
        Some(db) if now_ms - LAST_CHECK_MS.load(Ordering::Relaxed) > CHECK_INTERVAL_MS => {
            LAST_CHECK_MS.store(now_ms, Ordering::Relaxed);
            let ok = match db.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    let pool = db.status();
                    tracing::error!(
                        error = %e,
                        pool_size = pool.size,
                        pool_idle = pool.idle,
                        "[HEALTH] PostgreSQL ping failed"
                    );
                    false
                }
            };
            LAST_OK.store(ok, Ordering::Relaxed);
            ok
        }
        Some(_) => LAST_OK.load(Ordering::Relaxed),
    };

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: now_ms,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                data: None,
            }),
        )
    }
}
