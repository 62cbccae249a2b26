use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};

use agenthub_core::delegation::BudgetState;
use agenthub_core::types::{usd_to_cents, TokenId};
use agenthub_lifecycle::BudgetReport;

use crate::auth::Principal;
use crate::error::ApiResult;
use crate::idempotency::idempotent;
use crate::state::AppState;
use crate::types::{parse_body, to_value, BudgetEventRequest, BudgetResponse, BudgetTotals};

fn budget_response(token_id: &TokenId, report: &BudgetReport) -> BudgetResponse {
    let warnings = match report.state {
        BudgetState::SoftAlert => vec!["budget.soft_alert".to_string()],
        BudgetState::ReauthorizationRequired => vec!["budget.reauth_required".to_string()],
        _ => vec![],
    };
    BudgetResponse {
        token_id: token_id.clone(),
        state: report.state.as_str().to_string(),
        spend_ratio: report.spend_ratio,
        totals: BudgetTotals {
            spend_usd: report.spend_usd(),
            max_budget_usd: report.max_budget_cents.map(|c| c as f64 / 100.0),
            event_count: report.event_count,
        },
        warnings,
    }
}

/// `POST /v1/budget/events` — record a cost-bearing event against a token.
/// Evaluation and insertion share one guarded write; a token already at
/// `hard_stop` rejects the event with `402`.
pub async fn record_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/budget/events",
        &headers,
        &body,
        || async {
            let req: BudgetEventRequest = parse_body(&body)?;
            let now = chrono::Utc::now().timestamp();
            let report = state.budget.record_event(
                &req.token_id,
                &principal.actor(),
                usd_to_cents(req.cost_usd),
                req.description.as_deref().unwrap_or("budget event"),
                now,
            )?;
            Ok((
                StatusCode::CREATED,
                to_value(&budget_response(&req.token_id, &report))?,
            ))
        },
    )
    .await
}

/// `GET /v1/budget/{token_id}` — current budget state for a token.
pub async fn evaluate(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(token_id): Path<String>,
) -> ApiResult<Json<BudgetResponse>> {
    let token_id = TokenId::new(token_id);
    let report = state.budget.evaluate(&token_id)?;
    Ok(Json(budget_response(&token_id, &report)))
}
