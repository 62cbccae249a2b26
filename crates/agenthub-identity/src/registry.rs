use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use agenthub_core::constants::{
    CREDENTIAL_DEFAULT_TTL_SECS, CREDENTIAL_MAX_TTL_SECS, CREDENTIAL_MIN_TTL_SECS,
    ROTATION_OVERLAP_GRACE_SECS, SECRET_BYTE_LENGTH,
};
use agenthub_core::error::CoreError;
use agenthub_core::identity::{
    AgentCredential, AgentIdentity, AgentStatus, CredentialStatus, CredentialType,
};
use agenthub_core::types::{AgentId, CredentialId, ScopeSet, Timestamp};
use agenthub_crypto::{hash_secret, random_secret, Secret};
use agenthub_store::StateDb;

/// Agent and credential registry (identity store domain logic).
///
/// Credential plaintexts are returned to the caller exactly once; only the
/// HMAC hash is persisted, and lookups go through the hash index.
pub struct IdentityRegistry {
    pub db: Arc<StateDb>,
    identity_secret: Secret,
}

impl IdentityRegistry {
    pub fn new(db: Arc<StateDb>, identity_secret: Secret) -> Self {
        Self {
            db,
            identity_secret,
        }
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn register_agent(
        &self,
        owner: &str,
        credential_type: CredentialType,
        public_key_pem: Option<String>,
        human_principal_id: Option<String>,
        configuration_checksum: Option<String>,
        metadata: BTreeMap<String, String>,
        now: Timestamp,
    ) -> Result<AgentIdentity, CoreError> {
        let agent = AgentIdentity {
            agent_id: AgentId::generate(),
            owner: owner.to_string(),
            credential_type,
            status: AgentStatus::Active,
            public_key_pem,
            human_principal_id,
            configuration_checksum,
            metadata,
            created_at: now,
            updated_at: now,
        };
        self.db.put_agent(&agent)?;
        info!(agent_id = %agent.agent_id, owner, "registered agent identity");
        Ok(agent)
    }

    /// Load an agent, requiring it to exist.
    pub fn require_agent(&self, agent_id: &AgentId) -> Result<AgentIdentity, CoreError> {
        self.db
            .get_agent(agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))
    }

    /// Load an agent, requiring it to exist and be active.
    pub fn require_active_agent(&self, agent_id: &AgentId) -> Result<AgentIdentity, CoreError> {
        let agent = self.require_agent(agent_id)?;
        if !agent.is_active() {
            return Err(CoreError::Revoked);
        }
        Ok(agent)
    }

    // ── Credentials ──────────────────────────────────────────────────────────

    /// Mint a credential for an active agent. Returns the row and the
    /// plaintext secret — the only time the plaintext exists outside the
    /// caller.
    pub fn create_credential(
        &self,
        agent_id: &AgentId,
        scopes: ScopeSet,
        ttl_seconds: Option<i64>,
        now: Timestamp,
    ) -> Result<(AgentCredential, String), CoreError> {
        self.require_active_agent(agent_id)?;
        let ttl = validate_ttl(ttl_seconds)?;

        let plaintext = random_secret(SECRET_BYTE_LENGTH);
        let credential = AgentCredential {
            credential_id: CredentialId::generate(),
            agent_id: agent_id.clone(),
            credential_hash: hash_secret(self.identity_secret.as_bytes(), &plaintext),
            scopes,
            issued_at: now,
            expires_at: now + ttl,
            rotation_parent_id: None,
            status: CredentialStatus::Active,
            rotated_at: None,
            revoked_at: None,
            revocation_reason: None,
        };
        self.db.put_credential(&credential)?;
        info!(credential_id = %credential.credential_id, agent_id = %agent_id, "issued credential");
        Ok((credential, plaintext))
    }

    /// Rotate a credential: mint a successor carrying the same scopes and
    /// mark the predecessor `rotated`. The predecessor keeps verifying for a
    /// short overlap grace so in-flight callers are not cut off mid-rotation.
    pub fn rotate_credential(
        &self,
        credential_id: &CredentialId,
        ttl_seconds: Option<i64>,
        now: Timestamp,
    ) -> Result<(AgentCredential, String), CoreError> {
        let _guard = self.db.lock_state();

        let mut predecessor = self
            .db
            .get_credential(credential_id)?
            .ok_or_else(|| CoreError::CredentialNotFound(credential_id.to_string()))?;
        if predecessor.status != CredentialStatus::Active {
            return Err(CoreError::Revoked);
        }
        self.require_active_agent(&predecessor.agent_id)?;
        let ttl = validate_ttl(ttl_seconds)?;

        let plaintext = random_secret(SECRET_BYTE_LENGTH);
        let successor = AgentCredential {
            credential_id: CredentialId::generate(),
            agent_id: predecessor.agent_id.clone(),
            credential_hash: hash_secret(self.identity_secret.as_bytes(), &plaintext),
            scopes: predecessor.scopes.clone(),
            issued_at: now,
            expires_at: now + ttl,
            rotation_parent_id: Some(predecessor.credential_id.clone()),
            status: CredentialStatus::Active,
            rotated_at: None,
            revoked_at: None,
            revocation_reason: None,
        };

        predecessor.status = CredentialStatus::Rotated;
        predecessor.rotated_at = Some(now);

        self.db.put_credential(&successor)?;
        self.db.put_credential(&predecessor)?;
        info!(
            predecessor = %predecessor.credential_id,
            successor = %successor.credential_id,
            "rotated credential"
        );
        Ok((successor, plaintext))
    }

    /// Resolve a presented plaintext secret to its credential and owning
    /// identity. Succeeds iff the hash matches a stored row, the row is
    /// `active` (or `rotated` within the overlap grace), unexpired, and the
    /// owning identity is active.
    ///
    /// Holds the state guard across the credential and identity reads so the
    /// lookup serializes against a concurrent kill-switch cascade.
    pub fn verify_credential_secret(
        &self,
        plaintext: &str,
        now: Timestamp,
    ) -> Result<(AgentCredential, AgentIdentity), CoreError> {
        let _guard = self.db.lock_state();

        let hash = hash_secret(self.identity_secret.as_bytes(), plaintext);
        let credential = self
            .db
            .get_credential_by_hash(&hash)?
            .ok_or(CoreError::InvalidCredential)?;

        match credential.status {
            CredentialStatus::Active => {}
            CredentialStatus::Rotated => {
                let rotated_at = credential.rotated_at.unwrap_or(0);
                if now >= rotated_at + ROTATION_OVERLAP_GRACE_SECS {
                    return Err(CoreError::Revoked);
                }
            }
            CredentialStatus::Revoked | CredentialStatus::Expired => {
                return Err(CoreError::Revoked);
            }
        }
        if now >= credential.expires_at {
            return Err(CoreError::CredentialExpired);
        }

        let agent = self.require_agent(&credential.agent_id)?;
        if !agent.is_active() {
            return Err(CoreError::Revoked);
        }
        Ok((credential, agent))
    }
}

fn validate_ttl(ttl_seconds: Option<i64>) -> Result<i64, CoreError> {
    let ttl = ttl_seconds.unwrap_or(CREDENTIAL_DEFAULT_TTL_SECS);
    if !(CREDENTIAL_MIN_TTL_SECS..=CREDENTIAL_MAX_TTL_SECS).contains(&ttl) {
        return Err(CoreError::CredentialTtlOutOfRange {
            got: ttl,
            min: CREDENTIAL_MIN_TTL_SECS,
            max: CREDENTIAL_MAX_TTL_SECS,
        });
    }
    Ok(ttl)
}
