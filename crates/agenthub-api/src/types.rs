//! Wire DTOs for the `/v1` surface. Money crosses the boundary as `*_usd`
//! JSON numbers and is converted to integer cents exactly once, here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use agenthub_core::delegation::{AuditEntry, DelegationRecord};
use agenthub_core::error::CoreError;
use agenthub_core::identity::{
    AgentAttestation, AgentCredential, AgentIdentity, CredentialType, DelegationToken,
    RevocationEvent, TrustLevel, TrustedDomain,
};
use agenthub_core::types::{cents_to_usd, AgentId, DomainId, ScopeSet, Timestamp, TokenId};

use crate::error::ApiError;

/// Decode a raw JSON body, mapping malformed input to the validation
/// envelope.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(CoreError::InvalidBody(e.to_string())))
}

pub fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError(CoreError::Serialization(e.to_string())))
}

// ── Identity requests ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub credential_type: CredentialType,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    #[serde(default)]
    pub human_principal_id: Option<String>,
    #[serde(default)]
    pub configuration_checksum: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCredentialRequest {
    pub scopes: ScopeSet,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RotateCredentialRequest {
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "unspecified".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BulkRevokeRequest {
    /// Owner whose identities are revoked; defaults to the caller's tenant.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_reason")]
    pub reason: String,
}

// ── Identity responses ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub owner: String,
    pub credential_type: CredentialType,
    pub status: String,
    pub created_at: Timestamp,
}

impl AgentResponse {
    pub fn from_entity(agent: &AgentIdentity) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            owner: agent.owner.clone(),
            credential_type: agent.credential_type,
            status: format!("{:?}", agent.status).to_lowercase(),
            created_at: agent.created_at,
        }
    }
}

/// Credential creation/rotation response — the only surfaces where the
/// plaintext `secret` ever appears.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub credential_id: String,
    pub agent_id: AgentId,
    pub secret: String,
    pub scopes: ScopeSet,
    pub expires_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_parent_id: Option<String>,
}

impl CredentialResponse {
    pub fn from_entity(credential: &AgentCredential, secret: String) -> Self {
        Self {
            credential_id: credential.credential_id.to_string(),
            agent_id: credential.agent_id.clone(),
            secret,
            scopes: credential.scopes.clone(),
            expires_at: credential.expires_at,
            rotation_parent_id: credential
                .rotation_parent_id
                .as_ref()
                .map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevocationEventResponse {
    pub event_id: String,
    pub revoked_type: String,
    pub revoked_id: String,
    pub agent_id: AgentId,
    pub reason: String,
    pub actor: String,
    pub cascade_count: u64,
    pub created_at: Timestamp,
}

impl RevocationEventResponse {
    pub fn from_entity(event: &RevocationEvent) -> Self {
        Self {
            event_id: event.event_id.to_string(),
            revoked_type: match event.revoked_type {
                agenthub_core::identity::RevokedType::Credential => "credential",
                agenthub_core::identity::RevokedType::DelegationToken => "delegation_token",
                agenthub_core::identity::RevokedType::AgentIdentity => "agent_identity",
            }
            .to_string(),
            revoked_id: event.revoked_id.clone(),
            agent_id: event.agent_id.clone(),
            reason: event.reason.clone(),
            actor: event.actor.clone(),
            cascade_count: event.cascade_count,
            created_at: event.created_at,
        }
    }
}

// ── Delegation tokens ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    /// Required for platform-owner callers; agents always issue as
    /// themselves.
    #[serde(default)]
    pub issuer_agent_id: Option<AgentId>,
    pub subject_agent_id: AgentId,
    pub delegated_scopes: ScopeSet,
    pub ttl_seconds: i64,
    #[serde(default)]
    pub parent_token_id: Option<TokenId>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub signed_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token_id: TokenId,
    pub signed_token: String,
    pub chain_depth: u8,
    pub expires_at: Timestamp,
}

/// Chain-audit view of a token; never includes the signature.
#[derive(Debug, Serialize)]
pub struct TokenSummary {
    pub token_id: TokenId,
    pub issuer_agent_id: AgentId,
    pub subject_agent_id: AgentId,
    pub delegated_scopes: ScopeSet,
    pub chain_depth: u8,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub revoked: bool,
}

impl TokenSummary {
    pub fn from_entity(token: &DelegationToken) -> Self {
        Self {
            token_id: token.token_id.clone(),
            issuer_agent_id: token.issuer_agent_id.clone(),
            subject_agent_id: token.subject_agent_id.clone(),
            delegated_scopes: token.delegated_scopes.clone(),
            chain_depth: token.chain_depth,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            revoked: token.revoked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub effective_scopes: ScopeSet,
    pub chain: Vec<TokenSummary>,
}

// ── Federation ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterDomainRequest {
    pub display_name: String,
    #[serde(default = "default_trust_level")]
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub public_key_pem: Option<String>,
    pub allowed_scopes: ScopeSet,
}

fn default_trust_level() -> TrustLevel {
    TrustLevel::Provisional
}

#[derive(Debug, Deserialize)]
pub struct AttestAgentRequest {
    pub domain_id: DomainId,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
    pub attested_scopes: ScopeSet,
    #[serde(default = "default_attestation_ttl")]
    pub ttl_seconds: i64,
}

fn default_attestation_ttl() -> i64 {
    24 * 3600
}

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub domain_id: DomainId,
    pub display_name: String,
    pub trust_level: TrustLevel,
    pub allowed_scopes: ScopeSet,
    pub registered_by: String,
    pub registered_at: Timestamp,
}

impl DomainResponse {
    pub fn from_entity(domain: &TrustedDomain) -> Self {
        Self {
            domain_id: domain.domain_id.clone(),
            display_name: domain.display_name.clone(),
            trust_level: domain.trust_level,
            allowed_scopes: domain.allowed_scopes.clone(),
            registered_by: domain.registered_by.clone(),
            registered_at: domain.registered_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttestationResponse {
    pub attestation_id: String,
    pub agent_id: AgentId,
    pub domain_id: DomainId,
    pub attested_scopes: ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub signature: String,
}

impl AttestationResponse {
    pub fn from_entity(attestation: &AgentAttestation) -> Self {
        Self {
            attestation_id: attestation.attestation_id.to_string(),
            agent_id: attestation.agent_id.clone(),
            domain_id: attestation.domain_id.clone(),
            attested_scopes: attestation.attested_scopes.clone(),
            issued_at: attestation.issued_at,
            expires_at: attestation.expires_at,
            signature: attestation.signature.clone(),
        }
    }
}

// ── Delegation lifecycle ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateDelegationRequest {
    pub requester_agent_id: AgentId,
    pub delegate_agent_id: AgentId,
    #[serde(default)]
    pub task_spec: serde_json::Value,
    pub estimated_cost_usd: f64,
    pub max_budget_usd: f64,
    #[serde(default)]
    pub simulated_actual_cost_usd: Option<f64>,
    #[serde(default)]
    pub token_id: Option<TokenId>,
}

#[derive(Debug, Serialize)]
pub struct DelegationResponse {
    pub delegation_id: String,
    pub status: String,
    pub stage: String,
    pub estimated_cost_usd: f64,
    pub max_budget_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost_usd: Option<f64>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DelegationResponse {
    pub fn from_record(record: &DelegationRecord, warnings: Vec<String>) -> Self {
        Self {
            delegation_id: record.delegation_id.to_string(),
            status: record.status.as_str().to_string(),
            stage: record.stage.as_str().to_string(),
            estimated_cost_usd: cents_to_usd(record.estimated_cost_cents),
            max_budget_usd: cents_to_usd(record.max_budget_cents),
            actual_cost_usd: record.actual_cost_cents.map(cents_to_usd),
            attempt_count: record.attempt_count,
            last_error: record.last_error.clone(),
            warnings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DelegationStatusResponse {
    #[serde(flatten)]
    pub summary: DelegationResponse,
    pub requester_agent_id: AgentId,
    pub delegate_agent_id: AgentId,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    pub audit_events: Vec<AuditEntry>,
}

// ── Budget ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BudgetEventRequest {
    pub token_id: TokenId,
    pub cost_usd: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BudgetTotals {
    pub spend_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    pub event_count: usize,
}

#[derive(Debug, Serialize)]
pub struct BudgetResponse {
    pub token_id: TokenId,
    pub state: String,
    pub spend_ratio: f64,
    pub totals: BudgetTotals,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
