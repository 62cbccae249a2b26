use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use agenthub_core::constants::{
    BREAKER_ERROR_RATE_PERCENT, BREAKER_HARD_STOP_RATE_PERCENT, BREAKER_MAX_WINDOW,
    BREAKER_MIN_SAMPLES, BREAKER_MIN_WINDOW,
};
use agenthub_core::error::CoreError;
use agenthub_lifecycle::BreakerState;

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::idempotency::idempotent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub window_size: Option<usize>,
}

/// `GET /v1/reliability/slo-dashboard?window_size=N` — error budget, window
/// metrics and breaker state.
pub async fn slo_dashboard(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let window_size = query
        .window_size
        .unwrap_or(state.config.breaker_window)
        .clamp(BREAKER_MIN_WINDOW, BREAKER_MAX_WINDOW);

    let breaker = state.breaker.lock().unwrap_or_else(|p| p.into_inner());
    let metrics = breaker.metrics(Some(window_size));
    let breaker_state = breaker.state();
    let latency_slo_ms = breaker.latency_slo_ms();
    drop(breaker);

    let error_budget_limit = BREAKER_ERROR_RATE_PERCENT as f64 / 100.0;
    let consumed = if error_budget_limit > 0.0 {
        (metrics.error_rate / error_budget_limit).min(1.0)
    } else {
        0.0
    };

    let mut alerts: Vec<&str> = Vec::new();
    if breaker_state == BreakerState::Open {
        alerts.push("breaker.open");
    }
    if metrics.hard_stop_rate * 100.0 >= BREAKER_HARD_STOP_RATE_PERCENT as f64 {
        alerts.push("budget.hard_stop_rate");
    }

    Ok(Json(json!({
        "policy": {
            "latency_slo_ms": latency_slo_ms,
            "error_rate_threshold": error_budget_limit,
            "hard_stop_rate_threshold": BREAKER_HARD_STOP_RATE_PERCENT as f64 / 100.0,
            "min_samples": BREAKER_MIN_SAMPLES,
        },
        "window": {
            "size": window_size,
            "samples": metrics.sample_count,
        },
        "metrics": {
            "success_rate": metrics.success_rate,
            "error_rate": metrics.error_rate,
            "hard_stop_rate": metrics.hard_stop_rate,
            "p95_latency_ms": metrics.p95_latency_ms,
        },
        "error_budget": {
            "consumed_ratio": consumed,
            "remaining_ratio": 1.0 - consumed,
        },
        "circuit_breaker": {
            "state": breaker_state.as_str(),
            "accepting_new_work": breaker_state != BreakerState::Open,
        },
        "alerts": alerts,
    })))
}

/// `POST /v1/reliability/breaker/reset` — operator action restoring
/// `closed`. Platform owners only.
pub async fn reset_breaker(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/reliability/breaker/reset",
        &headers,
        &body,
        || async {
            if !principal.is_platform_owner() {
                return Err(ApiError(CoreError::InsufficientScope));
            }
            state
                .breaker
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .operator_reset();
            Ok((StatusCode::OK, json!({ "state": "closed" })))
        },
    )
    .await
}
