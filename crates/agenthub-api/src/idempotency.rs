use std::future::Future;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use agenthub_core::constants::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER};
use agenthub_core::delegation::{IdempotencyRecord, IdempotencyStatus};
use agenthub_core::error::CoreError;
use agenthub_crypto::request_hash;
use agenthub_store::ReserveOutcome;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Run a mutating handler under idempotency protection.
///
/// The reservation binds (tenant, actor, method, route, key) to the SHA-256
/// of the raw body. Completion caches the serialized response so replays are
/// byte-identical and carry the replay header; the whole handler runs under
/// the request timeout, and an expired request fails the reservation so the
/// client may retry with the same key.
pub async fn idempotent<F, Fut>(
    state: &AppState,
    principal: &Principal,
    method: &str,
    route: &str,
    headers: &HeaderMap,
    body: &[u8],
    handler: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, serde_json::Value), ApiError>>,
{
    let Some(key) = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
    else {
        return ApiError(CoreError::IdempotencyKeyRequired).into_response();
    };

    let now = chrono::Utc::now().timestamp();
    let mut record = IdempotencyRecord {
        tenant: principal.tenant().to_string(),
        actor: principal.actor(),
        method: method.to_string(),
        route: route.to_string(),
        key: key.to_string(),
        request_hash: request_hash(body),
        status: IdempotencyStatus::Pending,
        http_status: None,
        response_body: None,
        created_at: now,
        updated_at: now,
    };

    match state.db.reserve_idempotency(&record) {
        Err(e) => ApiError(e).into_response(),
        Ok(ReserveOutcome::Conflict) => {
            warn!(route, key, "idempotency key reused with a different payload");
            ApiError(CoreError::IdempotencyConflict).into_response()
        }
        Ok(ReserveOutcome::InFlight) => {
            ApiError(CoreError::IdempotencyInFlight).into_response()
        }
        Ok(ReserveOutcome::Replay(cached)) => {
            debug!(route, key, "serving idempotent replay");
            cached_response(&cached, true)
        }
        Ok(ReserveOutcome::New) => {
            match tokio::time::timeout(state.config.request_timeout, handler()).await {
                Ok(Ok((status, value))) => {
                    // Serialize once; the stored string IS the response, so
                    // a replay is byte-identical by construction.
                    let body_string = value.to_string();
                    record.status = IdempotencyStatus::Completed;
                    record.http_status = Some(status.as_u16());
                    record.response_body = Some(body_string.clone());
                    record.updated_at = chrono::Utc::now().timestamp();
                    if let Err(e) = state.db.put_idempotency(&record) {
                        warn!(error = %e, "failed to cache idempotent response");
                    }
                    json_response(status, body_string, false)
                }
                Ok(Err(api_err)) => {
                    fail_reservation(state, &mut record);
                    api_err.into_response()
                }
                Err(_elapsed) => {
                    warn!(route, key, "request deadline exceeded; reservation reset");
                    fail_reservation(state, &mut record);
                    ApiError(CoreError::Timeout).into_response()
                }
            }
        }
    }
}

fn fail_reservation(state: &AppState, record: &mut IdempotencyRecord) {
    record.status = IdempotencyStatus::Failed;
    record.updated_at = chrono::Utc::now().timestamp();
    if let Err(e) = state.db.put_idempotency(record) {
        warn!(error = %e, "failed to mark idempotency reservation failed");
    }
}

fn cached_response(record: &IdempotencyRecord, replay: bool) -> Response {
    let status = record
        .http_status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    json_response(
        status,
        record.response_body.clone().unwrap_or_else(|| "{}".to_string()),
        replay,
    )
}

fn json_response(status: StatusCode, body: String, replay: bool) -> Response {
    let mut response = (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response();
    if replay {
        // Header names normalize to lowercase on the wire; from_bytes does
        // the normalization that from_static refuses.
        if let Ok(name) = axum::http::HeaderName::from_bytes(IDEMPOTENT_REPLAY_HEADER.as_bytes())
        {
            response
                .headers_mut()
                .insert(name, axum::http::HeaderValue::from_static("true"));
        }
    }
    response
}
