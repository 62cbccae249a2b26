use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;

use agenthub_core::delegation::{BudgetEvent, DelegationRecord, IdempotencyRecord};
use agenthub_core::error::CoreError;
use agenthub_core::identity::{
    AgentAttestation, AgentCredential, AgentIdentity, DelegationToken, RevocationEvent,
    TrustedDomain,
};
use agenthub_core::types::{
    AgentId, AttestationId, CredentialId, DelegationId, DomainId, Timestamp, TokenId, UsdCents,
};

use crate::outbox::OutboxEvent;

/// Outcome of an idempotency reservation attempt.
#[derive(Debug)]
pub enum ReserveOutcome {
    /// No prior reservation; the caller owns the key and must complete or
    /// fail it.
    New,
    /// A completed record with the same request hash exists; serve its
    /// cached response.
    Replay(IdempotencyRecord),
    /// A record exists for the key with a different request hash.
    Conflict,
    /// A pending record with the same hash exists — the original request is
    /// still running.
    InFlight,
}

/// Persistent state database backed by sled.
///
/// Named trees:
///   agents              — agent_id utf8        → bincode(AgentIdentity)
///   credentials         — credential_id utf8   → bincode(AgentCredential)
///   credential_hash_idx — hash hex utf8        → credential_id bytes
///   tokens              — token_id utf8        → bincode(DelegationToken)
///   revocations         — ts be8 + event_id    → bincode(RevocationEvent)
///   idempotency         — composite PK utf8    → bincode(IdempotencyRecord)
///   delegations         — delegation_id utf8   → bincode(DelegationRecord)
///   balances            — agent_id utf8        → u64 be (cents)
///   budget_events       — token_id + event_id  → bincode(BudgetEvent)
///   budget_totals       — token_id utf8        → u64 be (cents)
///   domains             — domain_id utf8       → bincode(TrustedDomain)
///   attestations        — attestation_id utf8  → bincode(AgentAttestation)
///   outbox              — ts be8 + event_id    → bincode(OutboxEvent)
///   meta                — utf8 key             → raw bytes
///
/// Consistency model:
/// - The kill-switch cascade commits through one `sled::Transactional`
///   batch over the agents/credentials/tokens/delegations trees
///   ([`StateDb::apply_revocation_cascade`]), so those rows flip as a unit.
/// - Every other compound mutation (escrow debit, settlement refund, budget
///   insert with ratio check) runs while holding [`StateDb::lock_state`] —
///   and so do the compound *reads* that must not observe them mid-flight
///   (credential verification, token-chain verification). A verify
///   therefore sees a cascade entirely or not at all.
/// - Idempotency reservations are settled by compare-and-swap on a single
///   row and need neither.
pub struct StateDb {
    db: sled::Db,
    agents: sled::Tree,
    credentials: sled::Tree,
    credential_hash_idx: sled::Tree,
    tokens: sled::Tree,
    revocations: sled::Tree,
    idempotency: sled::Tree,
    delegations: sled::Tree,
    balances: sled::Tree,
    budget_events: sled::Tree,
    budget_totals: sled::Tree,
    domains: sled::Tree,
    attestations: sled::Tree,
    outbox: sled::Tree,
    meta: sled::Tree,
    state_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn codec_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::Serialization(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(codec_err)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(codec_err)
}

fn u64_from_bytes(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    let n = bytes.len().min(8);
    arr[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(arr)
}

/// Key for time-ordered append-only trees: big-endian timestamp then id.
fn timeline_key(at: Timestamp, id: &str) -> Vec<u8> {
    let mut key = (at.max(0) as u64).to_be_bytes().to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let db = sled::open(path).map_err(storage_err)?;
        let agents              = db.open_tree("agents").map_err(storage_err)?;
        let credentials         = db.open_tree("credentials").map_err(storage_err)?;
        let credential_hash_idx = db.open_tree("credential_hash_idx").map_err(storage_err)?;
        let tokens              = db.open_tree("tokens").map_err(storage_err)?;
        let revocations         = db.open_tree("revocations").map_err(storage_err)?;
        let idempotency         = db.open_tree("idempotency").map_err(storage_err)?;
        let delegations         = db.open_tree("delegations").map_err(storage_err)?;
        let balances            = db.open_tree("balances").map_err(storage_err)?;
        let budget_events       = db.open_tree("budget_events").map_err(storage_err)?;
        let budget_totals       = db.open_tree("budget_totals").map_err(storage_err)?;
        let domains             = db.open_tree("domains").map_err(storage_err)?;
        let attestations        = db.open_tree("attestations").map_err(storage_err)?;
        let outbox              = db.open_tree("outbox").map_err(storage_err)?;
        let meta                = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            db, agents, credentials, credential_hash_idx, tokens, revocations,
            idempotency, delegations, balances, budget_events, budget_totals,
            domains, attestations, outbox, meta,
            state_lock: Mutex::new(()),
        })
    }

    /// Acquire the state guard. Engines hold this across any compound
    /// read-validate-write sequence, and verification paths hold it across
    /// their multi-row reads so they serialize against those writes.
    pub fn lock_state(&self) -> MutexGuard<'_, ()> {
        self.state_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), CoreError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn get_agent(&self, id: &AgentId) -> Result<Option<AgentIdentity>, CoreError> {
        match self.agents.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_agent(&self, agent: &AgentIdentity) -> Result<(), CoreError> {
        self.agents
            .insert(agent.agent_id.as_bytes(), encode(agent)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_agents(&self) -> Result<Vec<AgentIdentity>, CoreError> {
        let mut out = Vec::new();
        for item in self.agents.iter() {
            let (_, b) = item.map_err(storage_err)?;
            out.push(decode(&b)?);
        }
        Ok(out)
    }

    /// Every agent identity owned by `owner`.
    pub fn iter_agents_for_owner(&self, owner: &str) -> Result<Vec<AgentIdentity>, CoreError> {
        Ok(self
            .iter_agents()?
            .into_iter()
            .filter(|a| a.owner == owner)
            .collect())
    }

    // ── Credentials ──────────────────────────────────────────────────────────

    pub fn get_credential(&self, id: &CredentialId) -> Result<Option<AgentCredential>, CoreError> {
        match self.credentials.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    /// O(1) lookup by stored hash via the index tree.
    pub fn get_credential_by_hash(
        &self,
        credential_hash: &str,
    ) -> Result<Option<AgentCredential>, CoreError> {
        match self
            .credential_hash_idx
            .get(credential_hash.as_bytes())
            .map_err(storage_err)?
        {
            Some(id_bytes) => {
                let id = CredentialId::new(String::from_utf8_lossy(&id_bytes).to_string());
                self.get_credential(&id)
            }
            None => Ok(None),
        }
    }

    /// Insert or update a credential row, maintaining the hash index.
    pub fn put_credential(&self, cred: &AgentCredential) -> Result<(), CoreError> {
        self.credentials
            .insert(cred.credential_id.as_bytes(), encode(cred)?)
            .map_err(storage_err)?;
        self.credential_hash_idx
            .insert(
                cred.credential_hash.as_bytes(),
                cred.credential_id.as_bytes(),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_credentials_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<AgentCredential>, CoreError> {
        let mut out = Vec::new();
        for item in self.credentials.iter() {
            let (_, b) = item.map_err(storage_err)?;
            let cred: AgentCredential = decode(&b)?;
            if cred.agent_id == *agent_id {
                out.push(cred);
            }
        }
        Ok(out)
    }

    // ── Delegation tokens ────────────────────────────────────────────────────

    pub fn get_token(&self, id: &TokenId) -> Result<Option<DelegationToken>, CoreError> {
        match self.tokens.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_token(&self, token: &DelegationToken) -> Result<(), CoreError> {
        self.tokens
            .insert(token.token_id.as_bytes(), encode(token)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Tokens where `agent_id` is issuer or subject.
    pub fn iter_tokens_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<DelegationToken>, CoreError> {
        let mut out = Vec::new();
        for item in self.tokens.iter() {
            let (_, b) = item.map_err(storage_err)?;
            let tok: DelegationToken = decode(&b)?;
            if tok.issuer_agent_id == *agent_id || tok.subject_agent_id == *agent_id {
                out.push(tok);
            }
        }
        Ok(out)
    }

    // ── Revocation cascade ───────────────────────────────────────────────────

    /// Commit a kill-switch cascade: the flipped identity row, every revoked
    /// credential and token, and every flagged lifecycle row land in one
    /// `sled::Transactional` batch across the four trees, so no reader of
    /// those trees can observe a partially revoked subtree.
    ///
    /// The audit rows (revocation event, outbox) are appended right after
    /// the batch in the same guarded section; they are an at-least-once
    /// channel, not part of the visibility contract. Callers hold
    /// [`StateDb::lock_state`].
    pub fn apply_revocation_cascade(
        &self,
        agent: &AgentIdentity,
        credentials: &[AgentCredential],
        tokens: &[DelegationToken],
        delegations: &[DelegationRecord],
        event: &RevocationEvent,
        outbox_event: &OutboxEvent,
    ) -> Result<(), CoreError> {
        let agent_put = (agent.agent_id.as_bytes().to_vec(), encode(agent)?);
        let credential_puts = credentials
            .iter()
            .map(|c| Ok((c.credential_id.as_bytes().to_vec(), encode(c)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        let token_puts = tokens
            .iter()
            .map(|t| Ok((t.token_id.as_bytes().to_vec(), encode(t)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        let delegation_puts = delegations
            .iter()
            .map(|d| Ok((d.delegation_id.as_bytes().to_vec(), encode(d)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;

        let result: TransactionResult<(), ()> =
            (&self.agents, &self.credentials, &self.tokens, &self.delegations).transaction(
                |(agents_t, credentials_t, tokens_t, delegations_t)| {
                    agents_t.insert(agent_put.0.clone(), agent_put.1.clone())?;
                    for (key, value) in &credential_puts {
                        credentials_t.insert(key.clone(), value.clone())?;
                    }
                    for (key, value) in &token_puts {
                        tokens_t.insert(key.clone(), value.clone())?;
                    }
                    for (key, value) in &delegation_puts {
                        delegations_t.insert(key.clone(), value.clone())?;
                    }
                    Ok(())
                },
            );
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(CoreError::Storage("revocation cascade aborted".into()));
            }
            Err(TransactionError::Storage(e)) => return Err(storage_err(e)),
        }

        self.append_revocation(event)?;
        self.append_outbox(outbox_event)?;
        self.flush()
    }

    // ── Revocation events ────────────────────────────────────────────────────

    pub fn append_revocation(&self, event: &RevocationEvent) -> Result<(), CoreError> {
        let key = timeline_key(event.created_at, event.event_id.as_str());
        self.revocations
            .insert(key, encode(event)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent revocation events, newest first.
    pub fn iter_revocations(&self, limit: usize) -> Result<Vec<RevocationEvent>, CoreError> {
        let mut out = Vec::new();
        for item in self.revocations.iter().rev().take(limit) {
            let (_, b) = item.map_err(storage_err)?;
            out.push(decode(&b)?);
        }
        Ok(out)
    }

    // ── Idempotency ──────────────────────────────────────────────────────────

    /// Attempt to reserve an idempotency key with a pending record.
    ///
    /// Lock-free: the first-insert race is settled by compare-and-swap, so
    /// two concurrent requests with the same key cannot both see `New`.
    /// A `failed` record with a matching hash is re-reserved — a timed-out
    /// or failed request may be retried under the same key.
    pub fn reserve_idempotency(
        &self,
        record: &IdempotencyRecord,
    ) -> Result<ReserveOutcome, CoreError> {
        let key = IdempotencyRecord::storage_key(
            &record.tenant,
            &record.actor,
            &record.method,
            &record.route,
            &record.key,
        );
        let fresh = encode(record)?;
        loop {
            match self.idempotency.get(&key).map_err(storage_err)? {
                None => {
                    match self
                        .idempotency
                        .compare_and_swap(&key, None::<&[u8]>, Some(fresh.clone()))
                        .map_err(storage_err)?
                    {
                        Ok(()) => {
                            self.flush()?;
                            return Ok(ReserveOutcome::New);
                        }
                        // Lost the insert race; re-read and classify.
                        Err(_) => continue,
                    }
                }
                Some(existing_bytes) => {
                    let existing: IdempotencyRecord = decode(&existing_bytes)?;
                    if existing.request_hash != record.request_hash {
                        return Ok(ReserveOutcome::Conflict);
                    }
                    use agenthub_core::delegation::IdempotencyStatus::*;
                    match existing.status {
                        Completed => return Ok(ReserveOutcome::Replay(existing)),
                        Pending => return Ok(ReserveOutcome::InFlight),
                        Failed => {
                            match self
                                .idempotency
                                .compare_and_swap(
                                    &key,
                                    Some(existing_bytes),
                                    Some(fresh.clone()),
                                )
                                .map_err(storage_err)?
                            {
                                Ok(()) => {
                                    self.flush()?;
                                    return Ok(ReserveOutcome::New);
                                }
                                Err(_) => continue,
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<(), CoreError> {
        let key = IdempotencyRecord::storage_key(
            &record.tenant,
            &record.actor,
            &record.method,
            &record.route,
            &record.key,
        );
        self.idempotency
            .insert(key, encode(record)?)
            .map_err(storage_err)?;
        self.flush()
    }

    pub fn get_idempotency(
        &self,
        tenant: &str,
        actor: &str,
        method: &str,
        route: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CoreError> {
        let k = IdempotencyRecord::storage_key(tenant, actor, method, route, key);
        match self.idempotency.get(k).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    // ── Delegation lifecycle records ─────────────────────────────────────────

    pub fn get_delegation(&self, id: &DelegationId) -> Result<Option<DelegationRecord>, CoreError> {
        match self.delegations.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_delegation(&self, record: &DelegationRecord) -> Result<(), CoreError> {
        self.delegations
            .insert(record.delegation_id.as_bytes(), encode(record)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_delegations(&self) -> Result<Vec<DelegationRecord>, CoreError> {
        let mut out = Vec::new();
        for item in self.delegations.iter() {
            let (_, b) = item.map_err(storage_err)?;
            out.push(decode(&b)?);
        }
        Ok(out)
    }

    /// Terminal delegations ordered by completion time, most recent first.
    /// Seeds the breaker window after a restart.
    pub fn recent_completed_delegations(
        &self,
        limit: usize,
    ) -> Result<Vec<DelegationRecord>, CoreError> {
        let mut all: Vec<DelegationRecord> = self
            .iter_delegations()?
            .into_iter()
            .filter(|d| d.completed_at.is_some())
            .collect();
        all.sort_by_key(|d| d.completed_at.unwrap_or(0));
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    /// `running` rows whose heartbeat is older than `stale_before`.
    pub fn stale_running_delegations(
        &self,
        stale_before: Timestamp,
    ) -> Result<Vec<DelegationRecord>, CoreError> {
        use agenthub_core::delegation::DelegationStatus;
        Ok(self
            .iter_delegations()?
            .into_iter()
            .filter(|d| d.status == DelegationStatus::Running && d.heartbeat_at < stale_before)
            .collect())
    }

    // ── Delegation balances ──────────────────────────────────────────────────

    pub fn get_balance(&self, agent_id: &AgentId) -> Result<UsdCents, CoreError> {
        Ok(self
            .balances
            .get(agent_id.as_bytes())
            .map_err(storage_err)?
            .map(|b| u64_from_bytes(&b))
            .unwrap_or(0))
    }

    pub fn set_balance(&self, agent_id: &AgentId, cents: UsdCents) -> Result<(), CoreError> {
        self.balances
            .insert(agent_id.as_bytes(), cents.to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Budget events ────────────────────────────────────────────────────────

    /// Append a budget event and bump the per-token running total.
    /// Callers hold the state guard so evaluate-then-insert is atomic.
    pub fn append_budget_event(&self, event: &BudgetEvent) -> Result<UsdCents, CoreError> {
        let mut key = event.token_id.as_bytes().to_vec();
        key.push(0x1f);
        key.extend_from_slice(event.event_id.as_bytes());
        self.budget_events
            .insert(key, encode(event)?)
            .map_err(storage_err)?;

        let total = self.budget_total(&event.token_id)?.saturating_add(event.cost_cents);
        self.budget_totals
            .insert(event.token_id.as_bytes(), total.to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(total)
    }

    /// Current spend for a token in cents (O(1) via the totals tree).
    pub fn budget_total(&self, token_id: &TokenId) -> Result<UsdCents, CoreError> {
        Ok(self
            .budget_totals
            .get(token_id.as_bytes())
            .map_err(storage_err)?
            .map(|b| u64_from_bytes(&b))
            .unwrap_or(0))
    }

    pub fn iter_budget_events(&self, token_id: &TokenId) -> Result<Vec<BudgetEvent>, CoreError> {
        let mut prefix = token_id.as_bytes().to_vec();
        prefix.push(0x1f);
        let mut out = Vec::new();
        for item in self.budget_events.scan_prefix(prefix) {
            let (_, b) = item.map_err(storage_err)?;
            out.push(decode(&b)?);
        }
        Ok(out)
    }

    // ── Federation trust registry ────────────────────────────────────────────

    pub fn get_domain(&self, id: &DomainId) -> Result<Option<TrustedDomain>, CoreError> {
        match self.domains.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_domain(&self, domain: &TrustedDomain) -> Result<(), CoreError> {
        self.domains
            .insert(domain.domain_id.as_bytes(), encode(domain)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_domains(&self) -> Result<Vec<TrustedDomain>, CoreError> {
        let mut out = Vec::new();
        for item in self.domains.iter() {
            let (_, b) = item.map_err(storage_err)?;
            out.push(decode(&b)?);
        }
        Ok(out)
    }

    pub fn get_attestation(
        &self,
        id: &AttestationId,
    ) -> Result<Option<AgentAttestation>, CoreError> {
        match self.attestations.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_attestation(&self, att: &AgentAttestation) -> Result<(), CoreError> {
        self.attestations
            .insert(att.attestation_id.as_bytes(), encode(att)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Outbox ───────────────────────────────────────────────────────────────

    pub fn append_outbox(&self, event: &OutboxEvent) -> Result<(), CoreError> {
        let key = timeline_key(event.created_at, event.event_id.as_str());
        self.outbox
            .insert(key, encode(event)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Remove and return up to `max` outbox events, oldest first.
    pub fn drain_outbox(&self, max: usize) -> Result<Vec<OutboxEvent>, CoreError> {
        let mut out = Vec::new();
        let mut keys = Vec::new();
        for item in self.outbox.iter().take(max) {
            let (k, b) = item.map_err(storage_err)?;
            out.push(decode::<OutboxEvent>(&b)?);
            keys.push(k);
        }
        for k in keys {
            self.outbox.remove(k).map_err(storage_err)?;
        }
        Ok(out)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), CoreError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    // ── Counters (diagnostics) ───────────────────────────────────────────────

    pub fn count_agents(&self) -> u64 {
        self.agents.len() as u64
    }

    pub fn count_tokens(&self) -> u64 {
        self.tokens.len() as u64
    }

    pub fn count_delegations(&self) -> u64 {
        self.delegations.len() as u64
    }
}
