use std::sync::Arc;

use tracing::{info, warn};

use agenthub_core::error::CoreError;
use agenthub_core::identity::{
    AgentStatus, CredentialStatus, RevocationEvent, RevokedType,
};
use agenthub_core::types::{AgentId, CredentialId, EventId, Timestamp};
use agenthub_crypto::canonical;
use agenthub_store::{OutboxEvent, StateDb};

/// Revocation engine: single-target revocation and the cascading kill
/// switch.
///
/// A cascade collects every affected row under the store's state guard and
/// commits them through one `sled::Transactional` batch
/// ([`StateDb::apply_revocation_cascade`]). Verification paths hold the
/// same guard across their multi-row reads, so a concurrent verify observes
/// either no effect or a fully dead subtree — never a partially revoked
/// one.
pub struct RevocationEngine {
    pub db: Arc<StateDb>,
}

impl RevocationEngine {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Revoke one credential and emit the audit event.
    pub fn revoke_credential(
        &self,
        credential_id: &CredentialId,
        reason: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<RevocationEvent, CoreError> {
        let _guard = self.db.lock_state();

        let mut credential = self
            .db
            .get_credential(credential_id)?
            .ok_or_else(|| CoreError::CredentialNotFound(credential_id.to_string()))?;
        credential.status = CredentialStatus::Revoked;
        credential.revoked_at = Some(now);
        credential.revocation_reason = Some(reason.to_string());
        self.db.put_credential(&credential)?;

        let event = RevocationEvent {
            event_id: EventId::generate(),
            revoked_type: RevokedType::Credential,
            revoked_id: credential_id.to_string(),
            agent_id: credential.agent_id.clone(),
            reason: reason.to_string(),
            actor: actor.to_string(),
            cascade_count: 1,
            created_at: now,
        };
        self.db.append_revocation(&event)?;
        self.emit_outbox(&event, now)?;
        self.db.flush()?;
        info!(credential_id = %credential_id, reason, "revoked credential");
        Ok(event)
    }

    /// Kill switch: revoke an agent identity and everything it anchors —
    /// active credentials, delegation tokens where it is issuer or subject,
    /// and in-flight lifecycle rows, which are flagged to cancel on next
    /// touch.
    pub fn revoke_agent(
        &self,
        agent_id: &AgentId,
        reason: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<RevocationEvent, CoreError> {
        let _guard = self.db.lock_state();
        self.revoke_agent_locked(agent_id, reason, actor, now)
    }

    /// Bulk kill switch: cascade every identity owned by `owner`.
    pub fn revoke_all_for_owner(
        &self,
        owner: &str,
        reason: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<Vec<RevocationEvent>, CoreError> {
        let _guard = self.db.lock_state();
        let mut events = Vec::new();
        for agent in self.db.iter_agents_for_owner(owner)? {
            if agent.status == AgentStatus::Revoked {
                continue;
            }
            events.push(self.revoke_agent_locked(&agent.agent_id, reason, actor, now)?);
        }
        if events.is_empty() {
            warn!(owner, "bulk revocation matched no active identities");
        }
        Ok(events)
    }

    fn revoke_agent_locked(
        &self,
        agent_id: &AgentId,
        reason: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<RevocationEvent, CoreError> {
        let mut agent = self
            .db
            .get_agent(agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))?;
        agent.status = AgentStatus::Revoked;
        agent.updated_at = now;

        // Collect every row the cascade touches; nothing is written until
        // the whole set commits as one batch.
        let mut credentials = Vec::new();
        for mut credential in self.db.iter_credentials_for_agent(agent_id)? {
            if credential.status != CredentialStatus::Active {
                continue;
            }
            credential.status = CredentialStatus::Revoked;
            credential.revoked_at = Some(now);
            credential.revocation_reason = Some(reason.to_string());
            credentials.push(credential);
        }

        let mut tokens = Vec::new();
        for mut token in self.db.iter_tokens_for_agent(agent_id)? {
            if token.revoked {
                continue;
            }
            token.revoked = true;
            token.revoked_at = Some(now);
            tokens.push(token);
        }

        // In-flight lifecycle rows transition to `cancelled` on next touch;
        // no grant outlives the revoke.
        let mut delegations = Vec::new();
        for mut delegation in self.db.iter_delegations()? {
            if delegation.status.is_terminal() || delegation.cancel_requested {
                continue;
            }
            if delegation.requester_agent_id == *agent_id
                || delegation.delegate_agent_id == *agent_id
            {
                delegation.cancel_requested = true;
                delegation.updated_at = now;
                delegations.push(delegation);
            }
        }

        let cascade_count = (credentials.len() + tokens.len() + delegations.len()) as u64;
        let event = RevocationEvent {
            event_id: EventId::generate(),
            revoked_type: RevokedType::AgentIdentity,
            revoked_id: agent_id.to_string(),
            agent_id: agent_id.clone(),
            reason: reason.to_string(),
            actor: actor.to_string(),
            cascade_count,
            created_at: now,
        };
        let outbox_event = OutboxEvent {
            event_id: EventId::generate(),
            kind: "revocation".into(),
            payload_json: String::from_utf8_lossy(&canonical(&event)).into_owned(),
            created_at: now,
        };

        self.db.apply_revocation_cascade(
            &agent,
            &credentials,
            &tokens,
            &delegations,
            &event,
            &outbox_event,
        )?;
        info!(agent_id = %agent_id, cascade_count, reason, "kill switch cascade complete");
        Ok(event)
    }

    fn emit_outbox(&self, event: &RevocationEvent, now: Timestamp) -> Result<(), CoreError> {
        self.db.append_outbox(&OutboxEvent {
            event_id: EventId::generate(),
            kind: "revocation".into(),
            payload_json: String::from_utf8_lossy(&canonical(event)).into_owned(),
            created_at: now,
        })
    }
}
