use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use agenthub_core::error::CoreError;
use agenthub_core::identity::{
    AgentAttestation, TrustLevel, TrustedDomain,
};
use agenthub_core::types::{
    scopes_subset, AgentId, AttestationId, DomainId, ScopeSet, Timestamp,
};
use agenthub_crypto::{canonical, sign, verify, Secret};
use agenthub_store::StateDb;

/// Outcome of attestation verification. Carries reason codes either way so
/// the federation gateway can log its decision without replaying state.
#[derive(Clone, Debug)]
pub struct AttestationVerdict {
    pub valid: bool,
    pub reason_codes: Vec<String>,
    pub warning_codes: Vec<String>,
}

/// Federation trust registry: partner domain registration, agent attestation
/// issuance and verification, cross-domain scope ceilings.
pub struct TrustRegistry {
    pub db: Arc<StateDb>,
    signing_secret: Secret,
}

impl TrustRegistry {
    pub fn new(db: Arc<StateDb>, signing_secret: Secret) -> Self {
        Self { db, signing_secret }
    }

    // ── Domains ──────────────────────────────────────────────────────────────

    pub fn register_domain(
        &self,
        display_name: &str,
        trust_level: TrustLevel,
        public_key_pem: Option<String>,
        allowed_scopes: ScopeSet,
        registered_by: &str,
        now: Timestamp,
    ) -> Result<TrustedDomain, CoreError> {
        if display_name.is_empty() {
            return Err(CoreError::MissingField("display_name".into()));
        }
        let domain = TrustedDomain {
            domain_id: DomainId::generate(),
            display_name: display_name.to_string(),
            trust_level,
            public_key_pem,
            allowed_scopes,
            registered_by: registered_by.to_string(),
            registered_at: now,
        };
        self.db.put_domain(&domain)?;
        info!(domain_id = %domain.domain_id, display_name, "registered trust domain");
        Ok(domain)
    }

    // ── Attestations ─────────────────────────────────────────────────────────

    /// Attest an agent into a domain. The attested scopes must sit inside the
    /// domain's `allowed_scopes`; the signature covers the canonical
    /// envelope with the identity signing secret.
    pub fn attest_agent(
        &self,
        agent_id: &AgentId,
        domain_id: &DomainId,
        claims: BTreeMap<String, String>,
        attested_scopes: ScopeSet,
        ttl_seconds: i64,
        now: Timestamp,
    ) -> Result<AgentAttestation, CoreError> {
        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))?;
        if !agent.is_active() {
            return Err(CoreError::Revoked);
        }
        let domain = self
            .db
            .get_domain(domain_id)?
            .ok_or_else(|| CoreError::DomainNotFound(domain_id.to_string()))?;
        if domain.trust_level == TrustLevel::Revoked {
            return Err(CoreError::Revoked);
        }
        if !scopes_subset(&attested_scopes, &domain.allowed_scopes) {
            return Err(CoreError::AttestationScopeExceeded);
        }
        if ttl_seconds <= 0 {
            return Err(CoreError::InvalidBody("ttl_seconds must be positive".into()));
        }

        let mut attestation = AgentAttestation {
            attestation_id: AttestationId::generate(),
            agent_id: agent_id.clone(),
            domain_id: domain_id.clone(),
            claims,
            attested_scopes,
            issued_at: now,
            expires_at: now + ttl_seconds,
            signature: String::new(),
        };
        attestation.signature = sign(
            self.signing_secret.as_bytes(),
            &canonical(&attestation.envelope()),
        );
        self.db.put_attestation(&attestation)?;
        info!(attestation_id = %attestation.attestation_id, domain_id = %domain_id, "attested agent");
        Ok(attestation)
    }

    /// Verify a stored attestation: recompute the signature, check expiry,
    /// and re-check the scope ceiling against the domain's current state.
    pub fn verify_attestation(
        &self,
        attestation_id: &AttestationId,
        now: Timestamp,
    ) -> Result<AttestationVerdict, CoreError> {
        let attestation = self
            .db
            .get_attestation(attestation_id)?
            .ok_or_else(|| CoreError::AttestationNotFound(attestation_id.to_string()))?;

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if !verify(
            self.signing_secret.as_bytes(),
            &canonical(&attestation.envelope()),
            &attestation.signature,
        ) {
            reasons.push("federation.signature_invalid".to_string());
        }
        if attestation.expires_at <= now {
            reasons.push("federation.attestation_expired".to_string());
        }

        match self.db.get_domain(&attestation.domain_id)? {
            None => reasons.push("federation.domain_not_found".to_string()),
            Some(domain) => {
                match domain.trust_level {
                    TrustLevel::Revoked => {
                        reasons.push("federation.domain_revoked".to_string())
                    }
                    TrustLevel::Provisional => {
                        warnings.push("federation.domain_provisional".to_string())
                    }
                    TrustLevel::Verified => {}
                }
                if !scopes_subset(&attestation.attested_scopes, &domain.allowed_scopes) {
                    reasons.push("federation.scope_exceeded".to_string());
                }
            }
        }

        match self.db.get_agent(&attestation.agent_id)? {
            Some(agent) if agent.is_active() => {}
            _ => reasons.push("federation.agent_inactive".to_string()),
        }

        Ok(AttestationVerdict {
            valid: reasons.is_empty(),
            reason_codes: reasons,
            warning_codes: warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenthub_core::identity::{AgentIdentity, AgentStatus, CredentialType};

    fn setup(name: &str) -> TrustRegistry {
        let dir = std::env::temp_dir().join(format!(
            "agenthub_federation_test_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).expect("open temp db"));
        TrustRegistry::new(db, Secret::from_str_value("identity-secret"))
    }

    fn scopes(items: &[&str]) -> ScopeSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn seed_agent(db: &StateDb, id: &str) -> AgentId {
        let agent = AgentIdentity {
            agent_id: AgentId::new(id),
            owner: "owner-acme".into(),
            credential_type: CredentialType::Spiffe,
            status: AgentStatus::Active,
            public_key_pem: None,
            human_principal_id: None,
            configuration_checksum: None,
            metadata: BTreeMap::new(),
            created_at: 0,
            updated_at: 0,
        };
        db.put_agent(&agent).unwrap();
        agent.agent_id
    }

    #[test]
    fn attestation_round_trip_verifies() {
        let registry = setup("round_trip");
        let agent = seed_agent(&registry.db, "agt-1");
        let domain = registry
            .register_domain(
                "partner.example",
                TrustLevel::Verified,
                None,
                scopes(&["read", "execute"]),
                "platform",
                1_000,
            )
            .unwrap();

        let attestation = registry
            .attest_agent(
                &agent,
                &domain.domain_id,
                BTreeMap::from([("region".to_string(), "eu-west".to_string())]),
                scopes(&["read"]),
                3_600,
                1_000,
            )
            .unwrap();

        let verdict = registry
            .verify_attestation(&attestation.attestation_id, 1_100)
            .unwrap();
        assert!(verdict.valid, "reasons: {:?}", verdict.reason_codes);
        assert!(verdict.warning_codes.is_empty());
    }

    #[test]
    fn scope_ceiling_is_enforced() {
        let registry = setup("ceiling");
        let agent = seed_agent(&registry.db, "agt-1");
        let domain = registry
            .register_domain(
                "partner.example",
                TrustLevel::Verified,
                None,
                scopes(&["read"]),
                "platform",
                1_000,
            )
            .unwrap();

        assert!(matches!(
            registry.attest_agent(
                &agent,
                &domain.domain_id,
                BTreeMap::new(),
                scopes(&["read", "admin"]),
                3_600,
                1_000,
            ),
            Err(CoreError::AttestationScopeExceeded)
        ));
    }

    #[test]
    fn expired_attestation_is_invalid() {
        let registry = setup("expired");
        let agent = seed_agent(&registry.db, "agt-1");
        let domain = registry
            .register_domain(
                "partner.example",
                TrustLevel::Verified,
                None,
                scopes(&["read"]),
                "platform",
                1_000,
            )
            .unwrap();
        let attestation = registry
            .attest_agent(&agent, &domain.domain_id, BTreeMap::new(), scopes(&["read"]), 600, 1_000)
            .unwrap();

        let verdict = registry
            .verify_attestation(&attestation.attestation_id, 2_000)
            .unwrap();
        assert!(!verdict.valid);
        assert!(verdict
            .reason_codes
            .contains(&"federation.attestation_expired".to_string()));
    }

    #[test]
    fn provisional_domain_warns_but_verifies() {
        let registry = setup("provisional");
        let agent = seed_agent(&registry.db, "agt-1");
        let domain = registry
            .register_domain(
                "newpartner.example",
                TrustLevel::Provisional,
                None,
                scopes(&["read"]),
                "platform",
                1_000,
            )
            .unwrap();
        let attestation = registry
            .attest_agent(&agent, &domain.domain_id, BTreeMap::new(), scopes(&["read"]), 3_600, 1_000)
            .unwrap();

        let verdict = registry
            .verify_attestation(&attestation.attestation_id, 1_100)
            .unwrap();
        assert!(verdict.valid);
        assert_eq!(
            verdict.warning_codes,
            vec!["federation.domain_provisional".to_string()]
        );
    }

    #[test]
    fn tampered_attestation_fails_signature_check() {
        let registry = setup("tampered");
        let agent = seed_agent(&registry.db, "agt-1");
        let domain = registry
            .register_domain(
                "partner.example",
                TrustLevel::Verified,
                None,
                scopes(&["read"]),
                "platform",
                1_000,
            )
            .unwrap();
        let mut attestation = registry
            .attest_agent(&agent, &domain.domain_id, BTreeMap::new(), scopes(&["read"]), 3_600, 1_000)
            .unwrap();

        // Claims changed after signing.
        attestation
            .claims
            .insert("region".to_string(), "forged".to_string());
        registry.db.put_attestation(&attestation).unwrap();

        let verdict = registry
            .verify_attestation(&attestation.attestation_id, 1_100)
            .unwrap();
        assert!(!verdict.valid);
        assert!(verdict
            .reason_codes
            .contains(&"federation.signature_invalid".to_string()));
    }
}
