use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde_json::json;

use agenthub_core::error::CoreError;
use agenthub_core::types::{usd_to_cents, TokenId};
use agenthub_identity::IssueRequest;

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::routes::require_owned_agent;
use crate::state::AppState;
use crate::types::{
    IssueTokenRequest, TokenResponse, TokenSummary, VerifyTokenRequest, VerifyTokenResponse,
};

/// `POST /v1/identity/delegation-tokens` — issue a scope-attenuated token.
/// Naturally idempotent (a replay simply mints a sibling), so no
/// `Idempotency-Key` is required.
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<IssueTokenRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    // Agents always issue as themselves; platform owners must name the
    // issuing agent.
    let issuer_agent_id = match (&principal.agent_id, &req.issuer_agent_id) {
        (Some(own), Some(requested)) if own != requested => {
            return Err(ApiError(CoreError::InsufficientScope));
        }
        (Some(own), _) => own.clone(),
        (None, Some(requested)) => {
            require_owned_agent(&state, &principal, requested)?;
            requested.clone()
        }
        (None, None) => {
            return Err(ApiError(CoreError::MissingField("issuer_agent_id".into())));
        }
    };

    let now = chrono::Utc::now().timestamp();
    let issued = state.tokens.issue(
        IssueRequest {
            issuer_agent_id,
            subject_agent_id: req.subject_agent_id,
            delegated_scopes: req.delegated_scopes,
            ttl_seconds: req.ttl_seconds,
            parent_token_id: req.parent_token_id,
            max_budget_cents: req.max_budget_usd.map(usd_to_cents),
            issuer_scopes: principal.scopes.clone(),
        },
        now,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            token_id: issued.token.token_id.clone(),
            signed_token: issued.signed_token,
            chain_depth: issued.token.chain_depth,
            expires_at: issued.token.expires_at,
        }),
    ))
}

/// `POST /v1/identity/delegation-tokens/verify` — verify a bearer token and
/// report its effective scopes and chain. Failures surface as
/// `401 delegation.chain_invalid` / `401 identity.revoked`.
pub async fn verify_token(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Json(req): Json<VerifyTokenRequest>,
) -> ApiResult<Json<VerifyTokenResponse>> {
    let now = chrono::Utc::now().timestamp();
    let verified = state.tokens.verify_signed(&req.signed_token, now)?;
    Ok(Json(VerifyTokenResponse {
        valid: true,
        effective_scopes: verified.effective_scopes,
        chain: verified.chain.iter().map(TokenSummary::from_entity).collect(),
    }))
}

/// `GET /v1/identity/delegation-tokens/{id}/chain` — audit listing of a
/// token and all its ancestors.
pub async fn token_chain(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let chain = state.tokens.chain_for(&TokenId::new(id))?;
    let summaries: Vec<TokenSummary> = chain.iter().map(TokenSummary::from_entity).collect();
    Ok(Json(json!({ "chain": summaries })))
}
