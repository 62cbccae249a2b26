use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use agenthub_core::constants::{API_KEY_HEADER, DELEGATION_TOKEN_HEADER};
use agenthub_core::error::CoreError;
use agenthub_core::types::{AgentId, ScopeSet, Timestamp, TokenId};
use agenthub_crypto::{canonical, sign, verify, Secret};

use crate::config::AccessMode;
use crate::error::ApiError;
use crate::state::AppState;

/// How a request authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    AgentCredential,
    DelegationToken,
    Bearer,
    /// `warn` mode fallback after a failed or missing authentication.
    WarnFallback,
}

/// The resolved caller identity attached to every authenticated request.
#[derive(Clone, Debug)]
pub struct Principal {
    /// Owning tenant.
    pub owner: String,
    /// The acting agent, when the caller is an agent rather than the
    /// platform owner.
    pub agent_id: Option<AgentId>,
    pub scopes: ScopeSet,
    pub auth_method: AuthMethod,
    /// Set when authenticated via a delegation token.
    pub token_id: Option<TokenId>,
    pub chain_depth: Option<u8>,
}

impl Principal {
    /// Tenant key for idempotency and audit rows.
    pub fn tenant(&self) -> &str {
        &self.owner
    }

    /// Actor key: the agent when present, the owner otherwise.
    pub fn actor(&self) -> String {
        self.agent_id
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.owner.clone())
    }

    /// Platform owners (API key auth) hold unrestricted scope.
    pub fn is_platform_owner(&self) -> bool {
        self.auth_method == AuthMethod::ApiKey
    }
}

// ── Bearer tokens ────────────────────────────────────────────────────────────

/// Claims carried by an `Authorization: Bearer` scoped token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BearerClaims {
    pub owner: String,
    pub scopes: ScopeSet,
    pub expires_at: Timestamp,
}

/// Mint a scoped bearer token: `b64url(canonical(claims)).hmac_hex`.
/// Issued out-of-band by operator tooling; the resolver only verifies.
pub fn mint_bearer(secret: &Secret, claims: &BearerClaims) -> String {
    let payload = URL_SAFE_NO_PAD.encode(canonical(claims));
    let signature = sign(secret.as_bytes(), payload.as_bytes());
    format!("{payload}.{signature}")
}

fn verify_bearer(secret: &Secret, token: &str, now: Timestamp) -> Result<BearerClaims, CoreError> {
    let (payload, signature) = token.split_once('.').ok_or(CoreError::InvalidBearerToken)?;
    if !verify(secret.as_bytes(), payload.as_bytes(), signature) {
        return Err(CoreError::InvalidBearerToken);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CoreError::InvalidBearerToken)?;
    let claims: BearerClaims =
        serde_json::from_slice(&bytes).map_err(|_| CoreError::InvalidBearerToken)?;
    if claims.expires_at <= now {
        return Err(CoreError::InvalidBearerToken);
    }
    Ok(claims)
}

// ── Resolution pipeline ──────────────────────────────────────────────────────

/// Resolve a request to a [`Principal`]. First match wins:
///
/// 1. `X-API-Key` — platform owner from the configured key map;
/// 2. `Authorization: AgentCredential <secret>` — HMAC lookup;
/// 3. `X-Delegation-Token: <jti>.<signature>` — full chain verification;
/// 4. `Authorization: Bearer <token>` — scoped-token signature and TTL.
pub fn resolve_principal(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    now: Timestamp,
) -> Result<Principal, CoreError> {
    if let Some(key) = header_str(headers, API_KEY_HEADER) {
        let owner = state
            .config
            .api_keys
            .get(key)
            .ok_or(CoreError::UnknownApiKey)?;
        return Ok(Principal {
            owner: owner.clone(),
            agent_id: None,
            scopes: ["*".to_string()].into_iter().collect(),
            auth_method: AuthMethod::ApiKey,
            token_id: None,
            chain_depth: None,
        });
    }

    if let Some(authorization) = header_str(headers, "authorization") {
        if let Some(secret) = authorization.strip_prefix("AgentCredential ") {
            let (credential, agent) = state.registry.verify_credential_secret(secret, now)?;
            return Ok(Principal {
                owner: agent.owner,
                agent_id: Some(credential.agent_id),
                scopes: credential.scopes,
                auth_method: AuthMethod::AgentCredential,
                token_id: None,
                chain_depth: None,
            });
        }
    }

    if let Some(signed_token) = header_str(headers, DELEGATION_TOKEN_HEADER) {
        let verified = state.tokens.verify_signed(signed_token, now)?;
        let subject = state
            .registry
            .require_active_agent(&verified.token.subject_agent_id)?;
        return Ok(Principal {
            owner: subject.owner,
            agent_id: Some(verified.token.subject_agent_id.clone()),
            scopes: verified.effective_scopes,
            auth_method: AuthMethod::DelegationToken,
            token_id: Some(verified.token.token_id.clone()),
            chain_depth: Some(verified.token.chain_depth),
        });
    }

    if let Some(authorization) = header_str(headers, "authorization") {
        if let Some(token) = authorization.strip_prefix("Bearer ") {
            let claims = verify_bearer(&state.config.bearer_secret, token, now)?;
            return Ok(Principal {
                owner: claims.owner,
                agent_id: None,
                scopes: claims.scopes,
                auth_method: AuthMethod::Bearer,
                token_id: None,
                chain_depth: None,
            });
        }
    }

    Err(CoreError::AuthMissing)
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Auth middleware for protected routes. Fail-closed in `enforce` mode; in
/// `warn` mode a failed resolution logs and proceeds with an anonymous
/// wildcard principal (migration windows only).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    match resolve_principal(&state, request.headers(), now) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => match state.config.access_mode {
            AccessMode::Enforce => ApiError(e).into_response(),
            AccessMode::Warn => {
                warn!(
                    code = e.code(),
                    path = %request.uri().path(),
                    "auth failed; continuing in warn mode"
                );
                request.extensions_mut().insert(Principal {
                    owner: "anonymous".to_string(),
                    agent_id: None,
                    scopes: ["*".to_string()].into_iter().collect(),
                    auth_method: AuthMethod::WarnFallback,
                    token_id: None,
                    chain_depth: None,
                });
                next.run(request).await
            }
        },
    }
}
