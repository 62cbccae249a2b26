use thiserror::Error;

/// Domain error sum for the whole control plane.
///
/// Every internal operation returns one of these; mapping to an HTTP status
/// and the `{"detail": {"code", "message"}}` envelope happens at exactly one
/// boundary (the api crate). `code()` yields the public dotted error code.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation (400) ─────────────────────────────────────────────────────
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("credential ttl out of range: {got}s (allowed {min}..={max})")]
    CredentialTtlOutOfRange { got: i64, min: i64, max: i64 },

    #[error("estimated cost exceeds max budget")]
    EstimatedExceedsBudget,

    // ── Auth (401) ───────────────────────────────────────────────────────────
    #[error("missing or malformed authentication")]
    AuthMissing,

    #[error("unknown API key")]
    UnknownApiKey,

    #[error("credential verification failed")]
    InvalidCredential,

    #[error("bearer token verification failed")]
    InvalidBearerToken,

    // ── Identity ─────────────────────────────────────────────────────────────
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    #[error("identity, credential or token has been revoked")]
    Revoked,

    #[error("credential has expired")]
    CredentialExpired,

    #[error("delegated scopes exceed the issuer's authority: {extra:?}")]
    ScopeNotAttenuated { extra: Vec<String> },

    #[error("delegation chain depth would exceed the maximum of {max}")]
    ChainTooDeep { max: u8 },

    #[error("only the holder of the parent token may re-delegate")]
    NotTokenHolder,

    #[error("delegation chain invalid at hop {hop}: {reason}")]
    ChainInvalid { hop: u8, reason: String },

    #[error("delegation token not found: {0}")]
    TokenNotFound(String),

    // ── Policy (403) ─────────────────────────────────────────────────────────
    #[error("policy denied: {violations:?}")]
    PolicyDenied { violations: Vec<String> },

    #[error("insufficient scope for this operation")]
    InsufficientScope,

    // ── Idempotency ──────────────────────────────────────────────────────────
    #[error("Idempotency-Key header required on this route")]
    IdempotencyKeyRequired,

    #[error("idempotency key reused with a different payload")]
    IdempotencyConflict,

    #[error("a request with this idempotency key is still in flight")]
    IdempotencyInFlight,

    // ── Budget (402) ─────────────────────────────────────────────────────────
    #[error("budget hard stop: spend ratio {spend_ratio:.2}")]
    BudgetHardStop { spend_ratio: f64 },

    #[error("budget reauthorization required: spend ratio {spend_ratio:.2}")]
    BudgetReauthRequired { spend_ratio: f64 },

    #[error("insufficient delegation balance: need {need_cents} cents, have {have_cents}")]
    InsufficientBalance { need_cents: u64, have_cents: u64 },

    // ── Federation ───────────────────────────────────────────────────────────
    #[error("trust domain not found: {0}")]
    DomainNotFound(String),

    #[error("attestation not found: {0}")]
    AttestationNotFound(String),

    #[error("attested scopes exceed the domain's allowed scopes")]
    AttestationScopeExceeded,

    // ── Lifecycle / reliability ──────────────────────────────────────────────
    #[error("delegation not found: {0}")]
    DelegationNotFound(String),

    #[error("circuit breaker is open; new delegations are rejected")]
    BreakerOpen,

    #[error("request deadline exceeded")]
    Timeout,

    // ── Storage ──────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// The public dotted error code for the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidBody(_) => "schema.invalid_body",
            CoreError::MissingField(_) => "schema.missing_field",
            CoreError::CredentialTtlOutOfRange { .. } => "schema.ttl_out_of_range",
            CoreError::EstimatedExceedsBudget => "schema.estimated_exceeds_budget",
            CoreError::AuthMissing => "auth.missing",
            CoreError::UnknownApiKey => "auth.unknown_api_key",
            CoreError::InvalidCredential => "auth.invalid_credential",
            CoreError::InvalidBearerToken => "auth.invalid_bearer",
            CoreError::AgentNotFound(_) => "identity.agent_not_found",
            CoreError::CredentialNotFound(_) => "identity.credential_not_found",
            CoreError::Revoked => "identity.revoked",
            CoreError::CredentialExpired => "identity.credential_expired",
            CoreError::ScopeNotAttenuated { .. } => "identity.scope_not_attenuated",
            CoreError::ChainTooDeep { .. } => "identity.chain_too_deep",
            CoreError::NotTokenHolder => "identity.not_token_holder",
            CoreError::ChainInvalid { .. } => "delegation.chain_invalid",
            CoreError::TokenNotFound(_) => "delegation.token_not_found",
            CoreError::PolicyDenied { .. } => "policy.denied",
            CoreError::InsufficientScope => "policy.insufficient_scope",
            CoreError::IdempotencyKeyRequired => "idempotency.key_required",
            CoreError::IdempotencyConflict => "idempotency.key_reused_with_different_payload",
            CoreError::IdempotencyInFlight => "idempotency.replay_in_progress",
            CoreError::BudgetHardStop { .. } => "budget.hard_stop",
            CoreError::BudgetReauthRequired { .. } => "budget.reauth_required",
            CoreError::InsufficientBalance { .. } => "budget.insufficient_balance",
            CoreError::DomainNotFound(_) => "federation.domain_not_found",
            CoreError::AttestationNotFound(_) => "federation.attestation_not_found",
            CoreError::AttestationScopeExceeded => "federation.scope_exceeded",
            CoreError::DelegationNotFound(_) => "delegation.not_found",
            CoreError::BreakerOpen => "breaker.open",
            CoreError::Timeout => "timeout",
            CoreError::Storage(_) => "internal.storage",
            CoreError::Serialization(_) => "internal.serialization",
        }
    }

    /// The HTTP status this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::InvalidBody(_)
            | CoreError::MissingField(_)
            | CoreError::CredentialTtlOutOfRange { .. }
            | CoreError::EstimatedExceedsBudget
            | CoreError::ScopeNotAttenuated { .. }
            | CoreError::ChainTooDeep { .. }
            | CoreError::IdempotencyKeyRequired => 400,

            CoreError::AuthMissing
            | CoreError::UnknownApiKey
            | CoreError::InvalidCredential
            | CoreError::InvalidBearerToken
            | CoreError::Revoked
            | CoreError::CredentialExpired
            | CoreError::ChainInvalid { .. } => 401,

            CoreError::BudgetHardStop { .. }
            | CoreError::BudgetReauthRequired { .. }
            | CoreError::InsufficientBalance { .. } => 402,

            CoreError::PolicyDenied { .. }
            | CoreError::InsufficientScope
            | CoreError::NotTokenHolder
            | CoreError::AttestationScopeExceeded => 403,

            CoreError::AgentNotFound(_)
            | CoreError::CredentialNotFound(_)
            | CoreError::TokenNotFound(_)
            | CoreError::DomainNotFound(_)
            | CoreError::AttestationNotFound(_)
            | CoreError::DelegationNotFound(_) => 404,

            CoreError::IdempotencyConflict | CoreError::IdempotencyInFlight => 409,

            CoreError::BreakerOpen => 503,
            CoreError::Timeout => 504,

            CoreError::Storage(_) | CoreError::Serialization(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_line_up() {
        let e = CoreError::IdempotencyConflict;
        assert_eq!(e.code(), "idempotency.key_reused_with_different_payload");
        assert_eq!(e.http_status(), 409);

        let e = CoreError::BudgetHardStop { spend_ratio: 1.25 };
        assert_eq!(e.code(), "budget.hard_stop");
        assert_eq!(e.http_status(), 402);

        let e = CoreError::ChainInvalid { hop: 2, reason: "revoked".into() };
        assert_eq!(e.code(), "delegation.chain_invalid");
        assert_eq!(e.http_status(), 401);

        let e = CoreError::BreakerOpen;
        assert_eq!(e.code(), "breaker.open");
        assert_eq!(e.http_status(), 503);
    }
}
