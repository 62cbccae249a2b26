use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use agenthub_core::constants::{DELEGATION_CONTRACT_VERSION, HEARTBEAT_RECLAIM_SECS};
use agenthub_core::delegation::{
    AuditEntry, DelegationRecord, DelegationStatus, FailureClass, LifecycleStage,
};
use agenthub_core::error::CoreError;
use agenthub_core::policy::{EnvironmentContext, PrincipalContext, ResourceContext};
use agenthub_core::types::{
    cents_to_usd, AgentId, DelegationId, EventId, Timestamp, TokenId, UsdCents,
};
use agenthub_crypto::{canonical, sign, Secret};
use agenthub_policy::PolicyEvaluator;
use agenthub_store::{OutboxEvent, StateDb};

use crate::budget::BudgetEngine;

/// Inputs to `POST /v1/delegations` after DTO conversion.
#[derive(Clone, Debug)]
pub struct DelegationRequest {
    pub requester_agent_id: AgentId,
    pub delegate_agent_id: AgentId,
    pub task_spec: serde_json::Value,
    pub estimated_cost_cents: UsdCents,
    pub max_budget_cents: UsdCents,
    pub simulated_actual_cost_cents: Option<UsdCents>,
    /// Budget-governance token this delegation spends against, when linked.
    pub token_id: Option<TokenId>,
}

/// Result of running (or resuming) a delegation to a terminal state.
#[derive(Clone, Debug)]
pub struct DelegationOutcome {
    pub record: DelegationRecord,
    pub warnings: Vec<String>,
}

/// The failure mode a task spec asks the simulated sandbox to exhibit.
/// Dev/test hook; absent means success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimulatedOutcome {
    Success,
    TransientNetworkError,
    DelegateTimeout,
    ContractMismatch,
}

impl SimulatedOutcome {
    fn from_task_spec(task_spec: &serde_json::Value) -> Self {
        match task_spec.get("simulated_outcome").and_then(|v| v.as_str()) {
            Some("transient_network_error") => SimulatedOutcome::TransientNetworkError,
            Some("delegate_timeout") => SimulatedOutcome::DelegateTimeout,
            Some("contract_mismatch") => SimulatedOutcome::ContractMismatch,
            _ => SimulatedOutcome::Success,
        }
    }
}

/// Six-stage durable delegation lifecycle engine.
///
/// Every stage transition is persisted before the next stage runs; the
/// engine keeps no in-process continuation state, so any process can resume
/// a stalled record from its last persisted stage. Stage effects are
/// idempotent: re-running a stage that already took its effect (escrow
/// debited, refund issued) is a no-op guarded by the persisted record.
pub struct LifecycleEngine {
    pub db: Arc<StateDb>,
    policy: Arc<PolicyEvaluator>,
    budget: Arc<BudgetEngine>,
    provenance_secret: Secret,
}

impl LifecycleEngine {
    pub fn new(
        db: Arc<StateDb>,
        policy: Arc<PolicyEvaluator>,
        budget: Arc<BudgetEngine>,
        provenance_secret: Secret,
    ) -> Self {
        Self {
            db,
            policy,
            budget,
            provenance_secret,
        }
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Create a delegation record and drive it to a terminal state.
    ///
    /// Request-shaped failures (policy denial, insufficient balance, budget
    /// hard stop, validation) surface as `Err` after the record is persisted
    /// `failed`; sandbox-shaped failures (exhausted retries, contract
    /// mismatch) return `Ok` with `status = failed` — they are delegation
    /// outcomes, not request errors.
    pub async fn submit(
        &self,
        req: DelegationRequest,
        now: Timestamp,
    ) -> Result<DelegationOutcome, CoreError> {
        if req.estimated_cost_cents > req.max_budget_cents {
            return Err(CoreError::EstimatedExceedsBudget);
        }

        let record = DelegationRecord {
            delegation_id: DelegationId::generate(),
            requester_agent_id: req.requester_agent_id.clone(),
            delegate_agent_id: req.delegate_agent_id.clone(),
            task_spec_json: String::from_utf8_lossy(&canonical(&req.task_spec)).into_owned(),
            status: DelegationStatus::Queued,
            stage: LifecycleStage::Discovery,
            estimated_cost_cents: req.estimated_cost_cents,
            max_budget_cents: req.max_budget_cents,
            actual_cost_cents: None,
            escrow_cents: 0,
            token_id: req.token_id.clone(),
            attempt_count: 0,
            last_error: None,
            heartbeat_at: now,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
            latency_ms: None,
            audit_events: vec![AuditEntry {
                at: now,
                stage: "discovery".into(),
                note: "delegation accepted".into(),
            }],
        };
        self.db.put_delegation(&record)?;
        self.run(record, req.simulated_actual_cost_cents).await
    }

    /// Resume a persisted record from its last stage (reaper path).
    pub async fn resume(
        &self,
        delegation_id: &DelegationId,
    ) -> Result<DelegationOutcome, CoreError> {
        let record = self
            .db
            .get_delegation(delegation_id)?
            .ok_or_else(|| CoreError::DelegationNotFound(delegation_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(DelegationOutcome {
                record,
                warnings: vec![],
            });
        }
        let simulated_actual = serde_json::from_str::<serde_json::Value>(&record.task_spec_json)
            .ok()
            .and_then(|v| v.get("simulated_actual_cost_cents").and_then(|c| c.as_u64()));
        self.run(record, simulated_actual).await
    }

    /// Reclaim `running` records whose heartbeat went stale and resume them.
    pub async fn reclaim_stale(&self, now: Timestamp) -> Vec<DelegationId> {
        let stale = match self
            .db
            .stale_running_delegations(now - HEARTBEAT_RECLAIM_SECS)
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "reaper scan failed");
                return vec![];
            }
        };
        let mut reclaimed = Vec::new();
        for row in stale {
            let id = row.delegation_id.clone();
            warn!(delegation_id = %id, stage = row.stage.as_str(), "reclaiming stale delegation");
            if self.resume(&id).await.is_ok() {
                reclaimed.push(id);
            }
        }
        reclaimed
    }

    // ── Stage machine ────────────────────────────────────────────────────────

    async fn run(
        &self,
        mut record: DelegationRecord,
        simulated_actual: Option<UsdCents>,
    ) -> Result<DelegationOutcome, CoreError> {
        let started = Instant::now();
        let mut warnings = Vec::new();
        record.status = DelegationStatus::Running;

        loop {
            let now = chrono::Utc::now().timestamp();
            record.heartbeat_at = now;
            record.updated_at = now;

            // A revocation cascade may have flagged the record between
            // stages; no in-flight grant outlives the revoke.
            if record.cancel_requested {
                record.status = DelegationStatus::Cancelled;
                record.last_error = Some("identity.revoked".into());
                record.push_audit(now, "cancelled by revocation cascade");
                let escrow = record.escrow_cents;
                self.refund_escrow(&mut record, escrow)?;
                return Ok(self.finish(record, started, warnings));
            }

            let step = match record.stage {
                LifecycleStage::Discovery => self.stage_discovery(&mut record, now),
                LifecycleStage::Negotiation => self.stage_negotiation(&mut record, now),
                LifecycleStage::Execution => self.stage_execution(&mut record, now).await,
                LifecycleStage::Delivery => self.stage_delivery(&mut record, now),
                LifecycleStage::Settlement => {
                    self.stage_settlement(&mut record, simulated_actual, now, &mut warnings)
                }
                LifecycleStage::Feedback => self.stage_feedback(&mut record, now),
            };

            match step {
                Ok(()) => {
                    if record.status.is_terminal() {
                        return Ok(self.finish(record, started, warnings));
                    }
                    match record.stage.next() {
                        Some(next) => {
                            record.stage = next;
                            self.db.put_delegation(&record)?;
                        }
                        None => {
                            record.status = DelegationStatus::Settled;
                            return Ok(self.finish(record, started, warnings));
                        }
                    }
                }
                Err(e) => {
                    record.status = DelegationStatus::Failed;
                    record.last_error = Some(e.code().to_string());
                    record.push_audit(now, format!("stage failed: {e}"));
                    self.finish(record, started, warnings);
                    return Err(e);
                }
            }
        }
    }

    fn finish(
        &self,
        mut record: DelegationRecord,
        started: Instant,
        warnings: Vec<String>,
    ) -> DelegationOutcome {
        let now = chrono::Utc::now().timestamp();
        record.completed_at = Some(now);
        record.latency_ms = Some(started.elapsed().as_millis() as u64);
        record.updated_at = now;
        if let Err(e) = self.db.put_delegation(&record) {
            warn!(error = %e, "failed to persist terminal delegation state");
        }
        let _ = self.db.flush();
        info!(
            delegation_id = %record.delegation_id,
            status = record.status.as_str(),
            stage = record.stage.as_str(),
            "delegation reached terminal state"
        );
        DelegationOutcome { record, warnings }
    }

    /// discovery: resolve both agents and fail fast on policy violations.
    fn stage_discovery(
        &self,
        record: &mut DelegationRecord,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let requester = self
            .db
            .get_agent(&record.requester_agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(record.requester_agent_id.to_string()))?;
        if !requester.is_active() {
            return Err(CoreError::Revoked);
        }
        let delegate = self
            .db
            .get_agent(&record.delegate_agent_id)?
            .ok_or_else(|| CoreError::AgentNotFound(record.delegate_agent_id.to_string()))?;
        if !delegate.is_active() {
            return Err(CoreError::Revoked);
        }

        let decision = self.policy.evaluate(
            &PrincipalContext {
                tenant_id: requester.owner.clone(),
                allowed_actions: ["delegations.execute".to_string()].into_iter().collect(),
                mfa_present: true,
            },
            &ResourceContext {
                tenant_id: delegate.owner.clone(),
                attributes: Default::default(),
            },
            &EnvironmentContext {
                requires_mfa: false,
            },
            "delegations.execute",
            now,
        );
        self.db.append_outbox(&OutboxEvent {
            event_id: EventId::generate(),
            kind: "policy_decision".into(),
            payload_json: String::from_utf8_lossy(&canonical(&decision)).into_owned(),
            created_at: now,
        })?;
        if !decision.is_allow() {
            return Err(CoreError::PolicyDenied {
                violations: decision.violation_codes,
            });
        }
        record.push_audit(now, "delegate resolved; policy allow");
        Ok(())
    }

    /// negotiation: atomically debit the escrow from the requester balance.
    fn stage_negotiation(
        &self,
        record: &mut DelegationRecord,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        // Idempotent on resume: the debit happened iff escrow is recorded.
        if record.escrow_cents > 0 {
            return Ok(());
        }
        let escrow = record.estimated_cost_cents;

        let _guard = self.db.lock_state();
        let balance = self.db.get_balance(&record.requester_agent_id)?;
        if balance < escrow {
            return Err(CoreError::InsufficientBalance {
                need_cents: escrow,
                have_cents: balance,
            });
        }
        self.db
            .set_balance(&record.requester_agent_id, balance - escrow)?;
        record.escrow_cents = escrow;
        record.push_audit(
            now,
            format!("escrow debited: {:.2} usd", cents_to_usd(escrow)),
        );
        Ok(())
    }

    /// execution: invoke the (simulated) sandboxed delegate under the retry
    /// matrix.
    async fn stage_execution(
        &self,
        record: &mut DelegationRecord,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let task_spec: serde_json::Value =
            serde_json::from_str(&record.task_spec_json).unwrap_or_default();
        let outcome = SimulatedOutcome::from_task_spec(&task_spec);

        let failure_class = match outcome {
            SimulatedOutcome::Success | SimulatedOutcome::ContractMismatch => {
                record.attempt_count += 1;
                record.push_audit(now, "delegate invocation complete");
                return Ok(());
            }
            SimulatedOutcome::TransientNetworkError => FailureClass::TransientNetworkError,
            SimulatedOutcome::DelegateTimeout => FailureClass::DelegateTimeout,
        };

        // A simulated failure class fails every attempt; the matrix bounds
        // how many we make.
        let max_retries = failure_class.max_retries();
        for attempt in 1..=(max_retries + 1) {
            record.attempt_count += 1;
            record.heartbeat_at = chrono::Utc::now().timestamp();
            self.db.put_delegation(record)?;
            warn!(
                delegation_id = %record.delegation_id,
                attempt,
                class = failure_class.as_str(),
                "delegate invocation failed"
            );
            if attempt <= max_retries {
                let backoff = failure_class.backoff_ms(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }
        }

        // Retries exhausted: terminal failure, escrow returns to the
        // requester.
        record.status = DelegationStatus::Failed;
        record.last_error = Some(failure_class.as_str().to_string());
        record.push_audit(now, format!("retries exhausted: {}", failure_class.as_str()));
        let escrow = record.escrow_cents;
        self.refund_escrow(record, escrow)?;
        Ok(())
    }

    /// delivery: validate the structured-output contract marker.
    fn stage_delivery(
        &self,
        record: &mut DelegationRecord,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let task_spec: serde_json::Value =
            serde_json::from_str(&record.task_spec_json).unwrap_or_default();
        if SimulatedOutcome::from_task_spec(&task_spec) == SimulatedOutcome::ContractMismatch {
            record.status = DelegationStatus::Failed;
            record.last_error = Some("delivery.contract_mismatch".into());
            record.push_audit(
                now,
                format!("output missing {DELEGATION_CONTRACT_VERSION} marker"),
            );
            let escrow = record.escrow_cents;
            self.refund_escrow(record, escrow)?;
            return Ok(());
        }
        record.push_audit(now, format!("{DELEGATION_CONTRACT_VERSION} marker present"));
        Ok(())
    }

    /// settlement: compute the actual cost, refund the unspent escrow, and
    /// block on the 1.2× hard-stop line.
    fn stage_settlement(
        &self,
        record: &mut DelegationRecord,
        simulated_actual: Option<UsdCents>,
        now: Timestamp,
        warnings: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        let actual = simulated_actual.unwrap_or(record.estimated_cost_cents);

        // Hard stop: actual > 1.2 × max_budget. Integer arithmetic.
        if (actual as u128) * 100 > (record.max_budget_cents as u128) * 120 {
            let escrow = record.escrow_cents;
            self.refund_escrow(record, escrow)?;
            return Err(CoreError::BudgetHardStop {
                spend_ratio: actual as f64 / record.max_budget_cents as f64,
            });
        }

        // Linked token: the spend lands on its budget ledger in the same
        // guarded write as the refund. An already hard-stopped token blocks
        // settlement.
        if let Some(token_id) = record.token_id.clone() {
            let report = self.budget.record_event(
                &token_id,
                record.requester_agent_id.as_str(),
                actual,
                "delegation settlement",
                now,
            )?;
            match report.state {
                agenthub_core::delegation::BudgetState::SoftAlert => {
                    warnings.push("budget.soft_alert".to_string());
                }
                agenthub_core::delegation::BudgetState::ReauthorizationRequired
                | agenthub_core::delegation::BudgetState::HardStop => {
                    warnings.push(format!("budget.{}", report.state.as_str()));
                }
                agenthub_core::delegation::BudgetState::Ok => {}
            }
        }

        let refund = record.escrow_cents.saturating_sub(actual);
        self.refund_escrow(record, refund)?;
        record.actual_cost_cents = Some(actual);
        record.push_audit(
            now,
            format!(
                "settled: actual {:.2} usd, refund {:.2} usd",
                cents_to_usd(actual),
                cents_to_usd(refund)
            ),
        );
        Ok(())
    }

    /// feedback: emit the signed usage signal for trust scoring.
    fn stage_feedback(
        &self,
        record: &mut DelegationRecord,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let payload = serde_json::json!({
            "delegation_id": record.delegation_id.as_str(),
            "requester_agent_id": record.requester_agent_id.as_str(),
            "delegate_agent_id": record.delegate_agent_id.as_str(),
            "actual_cost_usd": record.actual_cost_cents.map(cents_to_usd),
            "attempt_count": record.attempt_count,
            "emitted_at": now,
        });
        let body = canonical(&payload);
        let envelope = serde_json::json!({
            "signal": payload,
            "signature": sign(self.provenance_secret.as_bytes(), &body),
        });
        self.db.append_outbox(&OutboxEvent {
            event_id: EventId::generate(),
            kind: "usage_signal".into(),
            payload_json: String::from_utf8_lossy(&canonical(&envelope)).into_owned(),
            created_at: now,
        })?;
        record.push_audit(now, "usage signal emitted");
        record.status = DelegationStatus::Settled;
        Ok(())
    }

    /// Return `amount` to the requester and clear it from the held escrow.
    fn refund_escrow(
        &self,
        record: &mut DelegationRecord,
        amount: UsdCents,
    ) -> Result<(), CoreError> {
        if amount == 0 {
            record.escrow_cents = 0;
            return Ok(());
        }
        let _guard = self.db.lock_state();
        let balance = self.db.get_balance(&record.requester_agent_id)?;
        self.db
            .set_balance(&record.requester_agent_id, balance + amount)?;
        record.escrow_cents = 0;
        Ok(())
    }
}
