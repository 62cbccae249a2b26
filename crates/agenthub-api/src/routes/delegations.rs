use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde_json::json;

use agenthub_core::constants::{
    BUDGET_HARD_STOP_PERCENT, BUDGET_REAUTH_PERCENT, BUDGET_SOFT_ALERT_PERCENT,
    DELEGATION_CONTRACT_VERSION,
};
use agenthub_core::delegation::FailureClass;
use agenthub_core::error::CoreError;
use agenthub_core::types::{usd_to_cents, DelegationId};
use agenthub_lifecycle::{DelegationRequest, Sample};

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::idempotency::idempotent;
use crate::routes::require_owned_agent;
use crate::state::AppState;
use crate::types::{
    parse_body, to_value, CreateDelegationRequest, DelegationResponse, DelegationStatusResponse,
};

/// `GET /v1/delegations/contract` — version constant and limits. Public.
pub async fn contract(State(_state): State<AppState>) -> Json<serde_json::Value> {
    let matrix: Vec<serde_json::Value> = [
        FailureClass::TransientNetworkError,
        FailureClass::DelegateTimeout,
        FailureClass::PolicyDenied,
        FailureClass::HardStopBudget,
    ]
    .iter()
    .map(|class| {
        let backoffs: Vec<u64> = (1..=class.max_retries())
            .map(|attempt| class.backoff_ms(attempt))
            .collect();
        json!({
            "class": class.as_str(),
            "max_retries": class.max_retries(),
            "backoff_ms": backoffs,
        })
    })
    .collect();

    Json(json!({
        "version": DELEGATION_CONTRACT_VERSION,
        "retry_matrix": matrix,
        "budget_thresholds_percent": {
            "soft_alert": BUDGET_SOFT_ALERT_PERCENT,
            "reauthorization_required": BUDGET_REAUTH_PERCENT,
            "hard_stop": BUDGET_HARD_STOP_PERCENT,
        },
    }))
}

/// `POST /v1/delegations` — run the six-stage lifecycle to a terminal state.
///
/// Interlocks, in order: idempotency reservation, circuit breaker, then the
/// lifecycle engine (which applies policy and budget itself). Every terminal
/// outcome feeds the breaker window.
pub async fn create_delegation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/delegations",
        &headers,
        &body,
        || async {
            let req: CreateDelegationRequest = parse_body(&body)?;
            require_owned_agent(&state, &principal, &req.requester_agent_id)?;

            // Breaker gate: while open, no new work is admitted.
            {
                let breaker = state.breaker.lock().unwrap_or_else(|p| p.into_inner());
                if !breaker.allow_new_work() {
                    return Err(ApiError(CoreError::BreakerOpen));
                }
            }

            let started = Instant::now();
            let now = chrono::Utc::now().timestamp();
            let result = state
                .lifecycle
                .submit(
                    DelegationRequest {
                        requester_agent_id: req.requester_agent_id,
                        delegate_agent_id: req.delegate_agent_id,
                        task_spec: req.task_spec,
                        estimated_cost_cents: usd_to_cents(req.estimated_cost_usd),
                        max_budget_cents: usd_to_cents(req.max_budget_usd),
                        simulated_actual_cost_cents: req
                            .simulated_actual_cost_usd
                            .map(usd_to_cents),
                        token_id: req.token_id,
                    },
                    now,
                )
                .await;

            let latency_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(outcome) => {
                    let success = outcome.record.status
                        == agenthub_core::delegation::DelegationStatus::Settled;
                    record_sample(
                        &state,
                        Sample {
                            success,
                            hard_stop: false,
                            latency_ms: outcome.record.latency_ms.unwrap_or(latency_ms),
                        },
                    );
                    Ok((
                        StatusCode::CREATED,
                        to_value(&DelegationResponse::from_record(
                            &outcome.record,
                            outcome.warnings,
                        ))?,
                    ))
                }
                Err(e) => {
                    record_sample(
                        &state,
                        Sample {
                            success: false,
                            hard_stop: matches!(e, CoreError::BudgetHardStop { .. }),
                            latency_ms,
                        },
                    );
                    Err(ApiError(e))
                }
            }
        },
    )
    .await
}

fn record_sample(state: &AppState, sample: Sample) {
    state
        .breaker
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .record(sample);
}

/// `GET /v1/delegations/{id}/status`.
pub async fn delegation_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<DelegationStatusResponse>> {
    let delegation_id = DelegationId::new(id);
    let record = state
        .db
        .get_delegation(&delegation_id)?
        .ok_or_else(|| CoreError::DelegationNotFound(delegation_id.to_string()))?;
    // Visibility follows the requester's tenancy.
    require_owned_agent(&state, &principal, &record.requester_agent_id)?;

    Ok(Json(DelegationStatusResponse {
        summary: DelegationResponse::from_record(&record, vec![]),
        requester_agent_id: record.requester_agent_id.clone(),
        delegate_agent_id: record.delegate_agent_id.clone(),
        created_at: record.created_at,
        completed_at: record.completed_at,
        audit_events: record.audit_events.clone(),
    }))
}
