use std::sync::Arc;

use tracing::info;

use agenthub_core::constants::{MAX_CHAIN_DEPTH, TOKEN_MAX_TTL_SECS};
use agenthub_core::error::CoreError;
use agenthub_core::identity::DelegationToken;
use agenthub_core::types::{
    scopes_intersect, scopes_subset, AgentId, ScopeSet, Timestamp, TokenId, UsdCents,
};
use agenthub_crypto::{canonical, sign, verify, Secret};
use agenthub_store::StateDb;

/// Inputs to token issuance. `issuer_scopes` is the effective authority of
/// the calling principal; for a parentless token it is the attenuation
/// ceiling.
#[derive(Clone, Debug)]
pub struct IssueRequest {
    pub issuer_agent_id: AgentId,
    pub subject_agent_id: AgentId,
    pub delegated_scopes: ScopeSet,
    pub ttl_seconds: i64,
    pub parent_token_id: Option<TokenId>,
    pub max_budget_cents: Option<UsdCents>,
    pub issuer_scopes: ScopeSet,
}

/// An issued token plus its bearer form. The signature is the only bearer
/// secret; it is not recoverable from the stored row alone.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: DelegationToken,
    /// `<token_id>.<signature_hex>`.
    pub signed_token: String,
}

/// Result of a successful verification.
#[derive(Clone, Debug)]
pub struct VerifiedToken {
    pub token: DelegationToken,
    /// Intersection of `delegated_scopes` along the whole chain.
    pub effective_scopes: ScopeSet,
    /// The token and its ancestors, leaf first.
    pub chain: Vec<DelegationToken>,
}

/// Delegation token engine: issue, verify, decode and chain-walk
/// scope-attenuated bearer tokens.
pub struct TokenEngine {
    pub db: Arc<StateDb>,
    signing_secret: Secret,
}

impl TokenEngine {
    pub fn new(db: Arc<StateDb>, signing_secret: Secret) -> Self {
        Self { db, signing_secret }
    }

    // ── Issue ────────────────────────────────────────────────────────────────

    /// Issue a token, enforcing the attenuation law and the chain-depth
    /// bound. Expiry is clamped to the parent's.
    pub fn issue(&self, req: IssueRequest, now: Timestamp) -> Result<IssuedToken, CoreError> {
        let issuer = self
            .db
            .get_agent(&req.issuer_agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(req.issuer_agent_id.to_string()))?;
        if !issuer.is_active() {
            return Err(CoreError::Revoked);
        }
        let subject = self
            .db
            .get_agent(&req.subject_agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(req.subject_agent_id.to_string()))?;
        if !subject.is_active() {
            return Err(CoreError::Revoked);
        }
        if req.delegated_scopes.is_empty() {
            return Err(CoreError::MissingField("delegated_scopes".into()));
        }
        if req.ttl_seconds <= 0 || req.ttl_seconds > TOKEN_MAX_TTL_SECS {
            return Err(CoreError::InvalidBody(format!(
                "ttl_seconds must be in 1..={TOKEN_MAX_TTL_SECS}"
            )));
        }

        let (chain_depth, expires_at, attenuation_ceiling) = match &req.parent_token_id {
            None => (0u8, now + req.ttl_seconds, req.issuer_scopes.clone()),
            Some(parent_id) => {
                let parent = self
                    .db
                    .get_token(parent_id)?
                    .ok_or_else(|| CoreError::TokenNotFound(parent_id.to_string()))?;
                if parent.revoked {
                    return Err(CoreError::Revoked);
                }
                if parent.expires_at <= now {
                    return Err(CoreError::ChainInvalid {
                        hop: 0,
                        reason: "parent token expired".into(),
                    });
                }
                // Only the holder of the parent may re-delegate.
                if parent.subject_agent_id != req.issuer_agent_id {
                    return Err(CoreError::NotTokenHolder);
                }
                if parent.chain_depth + 1 > MAX_CHAIN_DEPTH {
                    return Err(CoreError::ChainTooDeep {
                        max: MAX_CHAIN_DEPTH,
                    });
                }
                let ceiling = self.effective_scopes(&parent, now)?;
                (
                    parent.chain_depth + 1,
                    (now + req.ttl_seconds).min(parent.expires_at),
                    ceiling,
                )
            }
        };

        // Attenuation law: delegated scopes never widen the issuer's
        // authority.
        if !scopes_subset(&req.delegated_scopes, &attenuation_ceiling) {
            let extra: Vec<String> = req
                .delegated_scopes
                .iter()
                .filter(|s| !attenuation_ceiling.contains(*s) && !attenuation_ceiling.contains("*"))
                .cloned()
                .collect();
            return Err(CoreError::ScopeNotAttenuated { extra });
        }

        let mut token = DelegationToken {
            token_id: TokenId::generate(),
            issuer_agent_id: req.issuer_agent_id,
            subject_agent_id: req.subject_agent_id,
            delegated_scopes: req.delegated_scopes,
            issued_at: now,
            expires_at,
            parent_token_id: req.parent_token_id,
            chain_depth,
            signature: String::new(),
            max_budget_cents: req.max_budget_cents,
            revoked: false,
            revoked_at: None,
        };
        token.signature = sign(
            self.signing_secret.as_bytes(),
            &canonical(&token.envelope()),
        );
        self.db.put_token(&token)?;
        info!(token_id = %token.token_id, chain_depth, "issued delegation token");

        let signed_token = format!("{}.{}", token.token_id, token.signature);
        Ok(IssuedToken {
            token,
            signed_token,
        })
    }

    // ── Verify ───────────────────────────────────────────────────────────────

    /// Verify a bearer token `<jti>.<signature>` and walk its chain to the
    /// root. Returns the effective scope set (intersection along the chain).
    ///
    /// Holds the state guard across the token and chain reads so the walk
    /// serializes against a concurrent kill-switch cascade: it sees the
    /// whole cascade or none of it.
    pub fn verify_signed(
        &self,
        signed_token: &str,
        now: Timestamp,
    ) -> Result<VerifiedToken, CoreError> {
        let _guard = self.db.lock_state();

        let (token_id, signature) = signed_token.split_once('.').ok_or_else(|| {
            CoreError::ChainInvalid {
                hop: 0,
                reason: "malformed token (expected <jti>.<signature>)".into(),
            }
        })?;
        let token = self
            .db
            .get_token(&TokenId::new(token_id))?
            .ok_or_else(|| CoreError::ChainInvalid {
                hop: 0,
                reason: "unknown token".into(),
            })?;

        // Recompute over the canonical envelope; constant-time compare.
        if !verify(
            self.signing_secret.as_bytes(),
            &canonical(&token.envelope()),
            signature,
        ) {
            return Err(CoreError::ChainInvalid {
                hop: 0,
                reason: "signature mismatch".into(),
            });
        }
        self.verify_chain_locked(&token, now)
    }

    /// Verify a stored token row (signature already established or implied)
    /// and its full chain, under the state guard.
    pub fn verify_token_row(
        &self,
        token: &DelegationToken,
        now: Timestamp,
    ) -> Result<VerifiedToken, CoreError> {
        let _guard = self.db.lock_state();
        self.verify_chain_locked(token, now)
    }

    /// Chain walk proper. Callers hold the state guard.
    fn verify_chain_locked(
        &self,
        token: &DelegationToken,
        now: Timestamp,
    ) -> Result<VerifiedToken, CoreError> {
        let chain = self.load_chain(token)?;
        let mut effective: Option<ScopeSet> = None;

        for (hop, link) in chain.iter().enumerate() {
            let hop = hop as u8;
            if link.revoked {
                return Err(CoreError::Revoked);
            }
            if link.expires_at <= now {
                return Err(CoreError::ChainInvalid {
                    hop,
                    reason: "token expired".into(),
                });
            }
            let issuer = self
                .db
                .get_agent(&link.issuer_agent_id)?
                .ok_or(CoreError::Revoked)?;
            if !issuer.is_active() {
                return Err(CoreError::Revoked);
            }
            // Each parent must cover its child (the child is the previous
            // element — the chain is leaf first).
            if hop > 0 {
                let child = &chain[(hop - 1) as usize];
                if !scopes_subset(&child.delegated_scopes, &link.delegated_scopes) {
                    return Err(CoreError::ChainInvalid {
                        hop,
                        reason: "child scopes exceed parent".into(),
                    });
                }
            }
            effective = Some(match effective {
                None => link.delegated_scopes.clone(),
                Some(acc) => scopes_intersect(&acc, &link.delegated_scopes),
            });
        }

        Ok(VerifiedToken {
            token: token.clone(),
            effective_scopes: effective.unwrap_or_default(),
            chain,
        })
    }

    /// The token plus all ancestors, leaf first. Bounded by the depth limit,
    /// which doubles as a cycle fail-safe.
    pub fn load_chain(&self, token: &DelegationToken) -> Result<Vec<DelegationToken>, CoreError> {
        let mut chain = vec![token.clone()];
        let mut cursor = token.parent_token_id.clone();
        while let Some(parent_id) = cursor {
            if chain.len() > MAX_CHAIN_DEPTH as usize {
                return Err(CoreError::ChainInvalid {
                    hop: chain.len() as u8,
                    reason: "chain exceeds depth bound".into(),
                });
            }
            let parent = self
                .db
                .get_token(&parent_id)?
                .ok_or_else(|| CoreError::ChainInvalid {
                    hop: chain.len() as u8,
                    reason: "missing ancestor".into(),
                })?;
            cursor = parent.parent_token_id.clone();
            chain.push(parent);
        }
        Ok(chain)
    }

    /// Chain listing for the audit endpoint: the token and all ancestors.
    pub fn chain_for(&self, token_id: &TokenId) -> Result<Vec<DelegationToken>, CoreError> {
        let token = self
            .db
            .get_token(token_id)?
            .ok_or_else(|| CoreError::TokenNotFound(token_id.to_string()))?;
        self.load_chain(&token)
    }

    /// Effective scopes of a (pre-verified) token: the chain intersection.
    fn effective_scopes(
        &self,
        token: &DelegationToken,
        now: Timestamp,
    ) -> Result<ScopeSet, CoreError> {
        Ok(self.verify_token_row(token, now)?.effective_scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenthub_core::identity::{AgentIdentity, AgentStatus, CredentialType};
    use std::collections::BTreeMap;

    fn temp_engine(name: &str) -> TokenEngine {
        let dir = std::env::temp_dir().join(format!(
            "agenthub_tokens_test_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StateDb::open(&dir).expect("open temp db"));
        TokenEngine::new(db, Secret::from_str_value("token-test-secret"))
    }

    fn seed_agent(db: &StateDb, id: &str) -> AgentId {
        let agent = AgentIdentity {
            agent_id: AgentId::new(id),
            owner: "owner-acme".into(),
            credential_type: CredentialType::ApiKey,
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

    fn scopes(items: &[&str]) -> ScopeSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn issue_req(issuer: &AgentId, subject: &AgentId, s: &[&str], ttl: i64) -> IssueRequest {
        IssueRequest {
            issuer_agent_id: issuer.clone(),
            subject_agent_id: subject.clone(),
            delegated_scopes: scopes(s),
            ttl_seconds: ttl,
            parent_token_id: None,
            max_budget_cents: None,
            issuer_scopes: scopes(&["read", "execute"]),
        }
    }

    #[test]
    fn attenuation_happy_path() {
        let eng = temp_engine("happy");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let parent = eng
            .issue(issue_req(&a, &b, &["read", "execute"], 3_600), 1_000)
            .unwrap();
        assert_eq!(parent.token.chain_depth, 0);

        let mut child_req = issue_req(&b, &b, &["read"], 600);
        child_req.parent_token_id = Some(parent.token.token_id.clone());
        let child = eng.issue(child_req, 1_010).unwrap();
        assert_eq!(child.token.chain_depth, 1);
        assert!(child.token.expires_at <= parent.token.expires_at);

        let verified = eng.verify_signed(&child.signed_token, 1_020).unwrap();
        assert_eq!(verified.effective_scopes, scopes(&["read"]));
        assert_eq!(verified.chain.len(), 2);
    }

    #[test]
    fn widened_scopes_are_rejected() {
        let eng = temp_engine("widen");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let parent = eng
            .issue(issue_req(&a, &b, &["read", "execute"], 3_600), 1_000)
            .unwrap();

        let mut req = issue_req(&b, &b, &["read", "execute", "admin"], 600);
        req.parent_token_id = Some(parent.token.token_id.clone());
        match eng.issue(req, 1_010) {
            Err(CoreError::ScopeNotAttenuated { extra }) => {
                assert_eq!(extra, vec!["admin".to_string()]);
            }
            other => panic!("expected scope_not_attenuated, got {other:?}"),
        }
    }

    #[test]
    fn sixth_hop_fails_chain_too_deep() {
        let eng = temp_engine("depth");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let mut parent_id = None;
        let mut issuer = a.clone();
        // Root (depth 0) plus five hops reaches the bound.
        for _ in 0..=MAX_CHAIN_DEPTH {
            let mut req = issue_req(&issuer, &b, &["read"], 3_600);
            req.parent_token_id = parent_id.clone();
            let issued = eng.issue(req, 1_000).unwrap();
            parent_id = Some(issued.token.token_id.clone());
            issuer = b.clone();
        }

        let mut req = issue_req(&b, &b, &["read"], 3_600);
        req.parent_token_id = parent_id;
        assert!(matches!(
            eng.issue(req, 1_000),
            Err(CoreError::ChainTooDeep { max: 5 })
        ));
    }

    #[test]
    fn only_holder_may_redelegate() {
        let eng = temp_engine("holder");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");
        let c = seed_agent(&eng.db, "agt-c");

        let parent = eng.issue(issue_req(&a, &b, &["read"], 3_600), 1_000).unwrap();

        // `c` holds nothing; re-delegating from the parent must fail.
        let mut req = issue_req(&c, &c, &["read"], 600);
        req.parent_token_id = Some(parent.token.token_id.clone());
        assert!(matches!(eng.issue(req, 1_010), Err(CoreError::NotTokenHolder)));
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let eng = temp_engine("tamper");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let issued = eng.issue(issue_req(&a, &b, &["read"], 3_600), 1_000).unwrap();
        let tampered = format!("{}.{}", issued.token.token_id, "ab".repeat(32));
        assert!(matches!(
            eng.verify_signed(&tampered, 1_010),
            Err(CoreError::ChainInvalid { .. })
        ));
    }

    #[test]
    fn expired_token_fails_verification() {
        let eng = temp_engine("expired");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let issued = eng.issue(issue_req(&a, &b, &["read"], 600), 1_000).unwrap();
        assert!(eng.verify_signed(&issued.signed_token, 1_500).is_ok());
        assert!(matches!(
            eng.verify_signed(&issued.signed_token, 1_600),
            Err(CoreError::ChainInvalid { .. })
        ));
    }

    #[test]
    fn expiry_clamps_to_parent() {
        let eng = temp_engine("clamp");
        let a = seed_agent(&eng.db, "agt-a");
        let b = seed_agent(&eng.db, "agt-b");

        let parent = eng.issue(issue_req(&a, &b, &["read"], 600), 1_000).unwrap();
        let mut req = issue_req(&b, &b, &["read"], 3_600);
        req.parent_token_id = Some(parent.token.token_id.clone());
        let child = eng.issue(req, 1_010).unwrap();
        assert_eq!(child.token.expires_at, parent.token.expires_at);
    }
}
