//! agenthub-core::identity
//!
//! Entity structs for the identity plane: agent identities, credentials,
//! delegation tokens, revocation events, trust-registry domains and agent
//! attestations.
//!
//! Design principles:
//! - Every status is an enumerated constant; no free-form strings switch
//!   behaviour.
//! - Credential rows persist the HMAC hash only; the plaintext secret exists
//!   in exactly one response body (creation).
//! - All records are serde-round-trippable for storage in sled trees, so no
//!   field may hold a self-describing JSON value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{
    AgentId, AttestationId, CredentialId, DomainId, EventId, ScopeSet, Timestamp, TokenId,
    UsdCents,
};

// ── AgentIdentity ────────────────────────────────────────────────────────────

/// How an agent authenticates to the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    ApiKey,
    Jwt,
    Spiffe,
    Mtls,
}

/// Identity lifecycle status. Identities are never destroyed; revocation
/// tombstones the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Revoked,
    Suspended,
}

/// An autonomous software principal, distinct from its human owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: AgentId,
    /// The owning platform principal (tenant).
    pub owner: String,
    pub credential_type: CredentialType,
    pub status: AgentStatus,
    /// PEM-encoded public key for mtls/spiffe identities.
    pub public_key_pem: Option<String>,
    /// Human principal this agent acts on behalf of, when bound.
    pub human_principal_id: Option<String>,
    /// SHA-256 hex of the agent's pinned configuration, when attested.
    pub configuration_checksum: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AgentIdentity {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

// ── AgentCredential ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Rotated,
    Revoked,
    Expired,
}

/// A bearer secret bound to an agent identity, persisted as its HMAC-SHA256
/// hash. At most one `active` row exists per rotation lineage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentCredential {
    pub credential_id: CredentialId,
    pub agent_id: AgentId,
    /// HMAC-SHA256(identity secret, plaintext) as lowercase hex.
    pub credential_hash: String,
    pub scopes: ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    /// Predecessor in the rotation lineage, if this row was minted by rotate.
    pub rotation_parent_id: Option<CredentialId>,
    pub status: CredentialStatus,
    /// Set when status left `active` (rotation keeps a short verify grace).
    pub rotated_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
}

// ── DelegationToken ──────────────────────────────────────────────────────────

/// A signed, scope-attenuated bearer token allowing one agent to act as
/// another within a bounded scope set and time window.
///
/// Invariants (enforced at issue time, re-checked at verify time):
/// - `delegated_scopes ⊆ effective_scopes(parent)`;
/// - `chain_depth = 0` iff `parent_token_id` is absent, else
///   `parent.chain_depth + 1 ≤ 5`;
/// - `expires_at ≤ parent.expires_at` when a parent exists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationToken {
    /// Unique token id (jti).
    pub token_id: TokenId,
    pub issuer_agent_id: AgentId,
    pub subject_agent_id: AgentId,
    pub delegated_scopes: ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub parent_token_id: Option<TokenId>,
    pub chain_depth: u8,
    /// HMAC-SHA256 over the canonical envelope, lowercase hex. The bearer
    /// secret is `<token_id>.<signature>`.
    pub signature: String,
    /// Spend ceiling for budget governance, when the issuer set one.
    pub max_budget_cents: Option<UsdCents>,
    pub revoked: bool,
    pub revoked_at: Option<Timestamp>,
}

/// The canonical payload the token signature covers. Field order is
/// irrelevant on the wire — canonical JSON sorts keys.
#[derive(Clone, Debug, Serialize)]
pub struct TokenEnvelope<'a> {
    pub token_id: &'a TokenId,
    pub issuer: &'a AgentId,
    pub subject: &'a AgentId,
    pub scopes: &'a ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub parent_token_id: &'a Option<TokenId>,
    pub chain_depth: u8,
}

impl DelegationToken {
    pub fn envelope(&self) -> TokenEnvelope<'_> {
        TokenEnvelope {
            token_id: &self.token_id,
            issuer: &self.issuer_agent_id,
            subject: &self.subject_agent_id,
            scopes: &self.delegated_scopes,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            parent_token_id: &self.parent_token_id,
            chain_depth: self.chain_depth,
        }
    }
}

// ── RevocationEvent ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokedType {
    Credential,
    DelegationToken,
    AgentIdentity,
}

/// Append-only audit row emitted by every revocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevocationEvent {
    pub event_id: EventId,
    pub revoked_type: RevokedType,
    /// Id of the revoked object (credential, token or agent id string).
    pub revoked_id: String,
    pub agent_id: AgentId,
    pub reason: String,
    /// The principal that triggered the revocation.
    pub actor: String,
    /// Total objects invalidated by the cascade (credentials + tokens +
    /// in-flight lifecycle rows flagged for cancellation).
    pub cascade_count: u64,
    pub created_at: Timestamp,
}

// ── Federation trust registry ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Verified,
    Provisional,
    Revoked,
}

/// A federation partner domain and the scope ceiling it may attest agents
/// into.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedDomain {
    pub domain_id: DomainId,
    pub display_name: String,
    pub trust_level: TrustLevel,
    pub public_key_pem: Option<String>,
    pub allowed_scopes: ScopeSet,
    pub registered_by: String,
    pub registered_at: Timestamp,
}

/// A signed assertion that an agent satisfies claims accepted by a trust
/// domain. Signed with the identity signing secret over the canonical
/// payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentAttestation {
    pub attestation_id: AttestationId,
    pub agent_id: AgentId,
    pub domain_id: DomainId,
    pub claims: BTreeMap<String, String>,
    /// Scopes the attestation asserts; must sit inside the domain's
    /// `allowed_scopes`.
    pub attested_scopes: ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub signature: String,
}

/// The canonical payload an attestation signature covers.
#[derive(Clone, Debug, Serialize)]
pub struct AttestationEnvelope<'a> {
    pub attestation_id: &'a AttestationId,
    pub agent_id: &'a AgentId,
    pub domain_id: &'a DomainId,
    pub claims: &'a BTreeMap<String, String>,
    pub attested_scopes: &'a ScopeSet,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

impl AgentAttestation {
    pub fn envelope(&self) -> AttestationEnvelope<'_> {
        AttestationEnvelope {
            attestation_id: &self.attestation_id,
            agent_id: &self.agent_id,
            domain_id: &self.domain_id,
            claims: &self.claims,
            attested_scopes: &self.attested_scopes,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}
