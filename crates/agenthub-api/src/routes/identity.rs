use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use agenthub_core::error::CoreError;
use agenthub_core::types::{AgentId, CredentialId};

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::idempotency::idempotent;
use crate::routes::require_owned_agent;
use crate::state::AppState;
use crate::types::{
    parse_body, to_value, AgentResponse, BulkRevokeRequest, CreateAgentRequest,
    CreateCredentialRequest, CredentialResponse, RevocationEventResponse, RevokeRequest,
    RotateCredentialRequest,
};

/// `POST /v1/identity/agents` — register an agent identity under the
/// caller's tenant.
pub async fn create_agent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/identity/agents",
        &headers,
        &body,
        || async {
            let req: CreateAgentRequest = parse_body(&body)?;
            let now = chrono::Utc::now().timestamp();
            let agent = state.registry.register_agent(
                &principal.owner,
                req.credential_type,
                req.public_key_pem,
                req.human_principal_id,
                req.configuration_checksum,
                req.metadata,
                now,
            )?;
            // Seed the delegation balance with the configured dev credit.
            state
                .db
                .set_balance(&agent.agent_id, state.config.initial_balance_cents)?;
            Ok((
                StatusCode::CREATED,
                to_value(&AgentResponse::from_entity(&agent))?,
            ))
        },
    )
    .await
}

/// `GET /v1/identity/agents/{id}` — read-back; never returns secret
/// material.
pub async fn get_agent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentResponse>> {
    let agent = require_owned_agent(&state, &principal, &AgentId::new(id))?;
    Ok(Json(AgentResponse::from_entity(&agent)))
}

/// `POST /v1/identity/agents/{id}/credentials` — mint a credential. The
/// plaintext secret appears in this response and nowhere else. Token
/// issuance is naturally idempotent, so no `Idempotency-Key` is required.
pub async fn create_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<CreateCredentialRequest>,
) -> ApiResult<(StatusCode, Json<CredentialResponse>)> {
    let agent_id = AgentId::new(id);
    require_owned_agent(&state, &principal, &agent_id)?;
    let now = chrono::Utc::now().timestamp();
    let (credential, secret) =
        state
            .registry
            .create_credential(&agent_id, req.scopes, req.ttl_seconds, now)?;
    Ok((
        StatusCode::CREATED,
        Json(CredentialResponse::from_entity(&credential, secret)),
    ))
}

/// `POST /v1/identity/credentials/{id}/rotate` — issue a successor and mark
/// the predecessor `rotated` with the overlap grace.
pub async fn rotate_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CredentialResponse>)> {
    let req: RotateCredentialRequest = if body.is_empty() {
        RotateCredentialRequest::default()
    } else {
        parse_body(&body)?
    };
    let credential_id = CredentialId::new(id);
    let existing = state
        .db
        .get_credential(&credential_id)?
        .ok_or_else(|| CoreError::CredentialNotFound(credential_id.to_string()))?;
    require_owned_agent(&state, &principal, &existing.agent_id)?;

    let now = chrono::Utc::now().timestamp();
    let (successor, secret) = state
        .registry
        .rotate_credential(&credential_id, req.ttl_seconds, now)?;
    Ok((
        StatusCode::CREATED,
        Json(CredentialResponse::from_entity(&successor, secret)),
    ))
}

/// `POST /v1/identity/credentials/{id}/revoke`.
pub async fn revoke_credential(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = format!("/v1/identity/credentials/{id}/revoke");
    idempotent(&state, &principal, "POST", &route, &headers, &body, || async {
        let req: RevokeRequest = if body.is_empty() {
            RevokeRequest {
                reason: "unspecified".into(),
            }
        } else {
            parse_body(&body)?
        };
        let credential_id = CredentialId::new(id.clone());
        let existing = state
            .db
            .get_credential(&credential_id)?
            .ok_or_else(|| CoreError::CredentialNotFound(credential_id.to_string()))?;
        require_owned_agent(&state, &principal, &existing.agent_id)?;

        let now = chrono::Utc::now().timestamp();
        state
            .revocation
            .revoke_credential(&credential_id, &req.reason, &principal.actor(), now)?;
        Ok((
            StatusCode::OK,
            json!({ "credential_id": credential_id.as_str(), "status": "revoked" }),
        ))
    })
    .await
}

/// `POST /v1/identity/agents/{id}/revoke` — the kill switch.
pub async fn revoke_agent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = format!("/v1/identity/agents/{id}/revoke");
    idempotent(&state, &principal, "POST", &route, &headers, &body, || async {
        let req: RevokeRequest = if body.is_empty() {
            RevokeRequest {
                reason: "unspecified".into(),
            }
        } else {
            parse_body(&body)?
        };
        let agent_id = AgentId::new(id.clone());
        require_owned_agent(&state, &principal, &agent_id)?;

        let now = chrono::Utc::now().timestamp();
        let event = state
            .revocation
            .revoke_agent(&agent_id, &req.reason, &principal.actor(), now)?;
        Ok((
            StatusCode::OK,
            json!({
                "agent_id": agent_id.as_str(),
                "status": "revoked",
                "cascade_count": event.cascade_count,
            }),
        ))
    })
    .await
}

/// `POST /v1/identity/revocations/bulk` — kill switch across every identity
/// of an owner.
pub async fn revoke_bulk(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    idempotent(
        &state,
        &principal,
        "POST",
        "/v1/identity/revocations/bulk",
        &headers,
        &body,
        || async {
            let req: BulkRevokeRequest = parse_body(&body)?;
            let owner = req.owner.unwrap_or_else(|| principal.owner.clone());
            if owner != principal.owner && !principal.is_platform_owner() {
                return Err(ApiError(CoreError::InsufficientScope));
            }
            let now = chrono::Utc::now().timestamp();
            let events =
                state
                    .revocation
                    .revoke_all_for_owner(&owner, &req.reason, &principal.actor(), now)?;
            let cascade_total: u64 = events.iter().map(|e| e.cascade_count).sum();
            Ok((
                StatusCode::OK,
                json!({
                    "owner": owner,
                    "revoked_agents": events.len(),
                    "cascade_count_total": cascade_total,
                }),
            ))
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct RevocationListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /v1/identity/revocations` — most recent revocation events.
pub async fn list_revocations(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Query(query): Query<RevocationListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).min(500);
    let events: Vec<RevocationEventResponse> = state
        .db
        .iter_revocations(limit)?
        .iter()
        .map(RevocationEventResponse::from_entity)
        .collect();
    Ok(Json(json!({ "events": events })))
}
