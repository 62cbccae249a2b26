use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde_json::json;

use agenthub_core::error::CoreError;
use agenthub_core::types::{AgentId, AttestationId};

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::idempotency::idempotent;
use crate::routes::require_owned_agent;
use crate::state::AppState;
use crate::types::{
    parse_body, to_value, AttestAgentRequest, AttestationResponse, DomainResponse,
    RegisterDomainRequest,
};

/// `POST /v1/identity/trust-registry/domains` — platform owners only.
pub async fn register_domain(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/identity/trust-registry/domains",
        &headers,
        &body,
        || async {
            if !principal.is_platform_owner() {
                return Err(ApiError(CoreError::InsufficientScope));
            }
            let req: RegisterDomainRequest = parse_body(&body)?;
            let now = chrono::Utc::now().timestamp();
            let domain = state.federation.register_domain(
                &req.display_name,
                req.trust_level,
                req.public_key_pem,
                req.allowed_scopes,
                &principal.owner,
                now,
            )?;
            Ok((
                StatusCode::CREATED,
                to_value(&DomainResponse::from_entity(&domain))?,
            ))
        },
    )
    .await
}

/// `GET /v1/identity/trust-registry/domains`.
pub async fn list_domains(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
) -> ApiResult<Json<serde_json::Value>> {
    let domains: Vec<DomainResponse> = state
        .db
        .iter_domains()?
        .iter()
        .map(DomainResponse::from_entity)
        .collect();
    Ok(Json(json!({ "domains": domains })))
}

/// `POST /v1/identity/agents/{id}/attest` — sign an attestation binding an
/// agent into a trust domain.
pub async fn attest_agent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = format!("/v1/identity/agents/{id}/attest");
    idempotent(&state, &principal, "POST", &route, &headers, &body, || async {
        let req: AttestAgentRequest = parse_body(&body)?;
        let agent_id = AgentId::new(id.clone());
        require_owned_agent(&state, &principal, &agent_id)?;

        let now = chrono::Utc::now().timestamp();
        let attestation = state.federation.attest_agent(
            &agent_id,
            &req.domain_id,
            req.claims,
            req.attested_scopes,
            req.ttl_seconds,
            now,
        )?;
        Ok((
            StatusCode::CREATED,
            to_value(&AttestationResponse::from_entity(&attestation))?,
        ))
    })
    .await
}

/// `GET /v1/identity/attestations/{id}/verify`.
pub async fn verify_attestation(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let now = chrono::Utc::now().timestamp();
    let verdict = state
        .federation
        .verify_attestation(&AttestationId::new(id), now)?;
    Ok(Json(json!({
        "valid": verdict.valid,
        "reason_codes": verdict.reason_codes,
        "warning_codes": verdict.warning_codes,
    })))
}
