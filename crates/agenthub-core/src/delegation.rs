//! agenthub-core::delegation
//!
//! Entity structs for the delegation lifecycle, budget governance and
//! idempotency planes.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BUDGET_HARD_STOP_PERCENT, BUDGET_REAUTH_PERCENT, BUDGET_SOFT_ALERT_PERCENT,
};
use crate::types::{AgentId, DelegationId, EventId, Timestamp, TokenId, UsdCents};

// ── Lifecycle stage ──────────────────────────────────────────────────────────

/// The six strictly-ordered stages of a delegation. Each stage transition is
/// persisted before its effects become observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Discovery,
    Negotiation,
    Execution,
    Delivery,
    Settlement,
    Feedback,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Discovery => "discovery",
            LifecycleStage::Negotiation => "negotiation",
            LifecycleStage::Execution => "execution",
            LifecycleStage::Delivery => "delivery",
            LifecycleStage::Settlement => "settlement",
            LifecycleStage::Feedback => "feedback",
        }
    }

    /// The successor stage, or `None` after `feedback`.
    pub fn next(&self) -> Option<LifecycleStage> {
        match self {
            LifecycleStage::Discovery => Some(LifecycleStage::Negotiation),
            LifecycleStage::Negotiation => Some(LifecycleStage::Execution),
            LifecycleStage::Execution => Some(LifecycleStage::Delivery),
            LifecycleStage::Delivery => Some(LifecycleStage::Settlement),
            LifecycleStage::Settlement => Some(LifecycleStage::Feedback),
            LifecycleStage::Feedback => None,
        }
    }
}

// ── Delegation status ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Queued,
    Running,
    Settled,
    Failed,
    Cancelled,
}

impl DelegationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelegationStatus::Settled | DelegationStatus::Failed | DelegationStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationStatus::Queued => "queued",
            DelegationStatus::Running => "running",
            DelegationStatus::Settled => "settled",
            DelegationStatus::Failed => "failed",
            DelegationStatus::Cancelled => "cancelled",
        }
    }
}

// ── Retry matrix ─────────────────────────────────────────────────────────────

/// Failure classification for the execution/delivery stages. Each class maps
/// to a fixed retry budget and backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    TransientNetworkError,
    DelegateTimeout,
    PolicyDenied,
    HardStopBudget,
}

impl FailureClass {
    pub fn max_retries(&self) -> u32 {
        match self {
            FailureClass::TransientNetworkError => 2,
            FailureClass::DelegateTimeout => 1,
            FailureClass::PolicyDenied => 0,
            FailureClass::HardStopBudget => 0,
        }
    }

    /// Backoff before retry number `attempt` (1-based), in milliseconds.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        match self {
            FailureClass::TransientNetworkError => match attempt {
                1 => 100,
                _ => 250,
            },
            FailureClass::DelegateTimeout => 200,
            FailureClass::PolicyDenied | FailureClass::HardStopBudget => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::TransientNetworkError => "transient_network_error",
            FailureClass::DelegateTimeout => "delegate_timeout",
            FailureClass::PolicyDenied => "policy_denied",
            FailureClass::HardStopBudget => "hard_stop_budget",
        }
    }
}

// ── DelegationRecord ─────────────────────────────────────────────────────────

/// One entry of the per-delegation audit log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: Timestamp,
    pub stage: String,
    pub note: String,
}

/// Durable state of one delegated task. Any process can pick up a stalled
/// record from the store and resume it from `stage`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation_id: DelegationId,
    pub requester_agent_id: AgentId,
    pub delegate_agent_id: AgentId,
    /// Canonical JSON of the caller-supplied task spec.
    pub task_spec_json: String,
    pub status: DelegationStatus,
    pub stage: LifecycleStage,
    pub estimated_cost_cents: UsdCents,
    pub max_budget_cents: UsdCents,
    pub actual_cost_cents: Option<UsdCents>,
    /// Amount debited from the requester at negotiation; refunded minus
    /// actual cost at settlement.
    pub escrow_cents: UsdCents,
    /// Budget-governance token this delegation spends against, when linked.
    pub token_id: Option<TokenId>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Set while `running`; rows stale beyond the reclaim window are resumed
    /// by the reaper.
    pub heartbeat_at: Timestamp,
    /// Set by a revocation cascade; the next touch transitions the record to
    /// `cancelled` instead of progressing.
    pub cancel_requested: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    /// Wall-clock duration of the full lifecycle run, for SLO accounting.
    pub latency_ms: Option<u64>,
    pub audit_events: Vec<AuditEntry>,
}

impl DelegationRecord {
    pub fn push_audit(&mut self, now: Timestamp, note: impl Into<String>) {
        self.audit_events.push(AuditEntry {
            at: now,
            stage: self.stage.as_str().to_string(),
            note: note.into(),
        });
    }
}

// ── Budget ───────────────────────────────────────────────────────────────────

/// One spend event against a delegation token. Append-only; the per-token sum
/// yields the current spend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetEvent {
    pub event_id: EventId,
    pub token_id: TokenId,
    pub actor: String,
    pub cost_cents: UsdCents,
    pub description: String,
    pub created_at: Timestamp,
}

/// Budget governance state derived from `spend / max_budget`. Monotone under
/// a single token: events only ever add spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Ok,
    SoftAlert,
    ReauthorizationRequired,
    HardStop,
}

impl BudgetState {
    /// Classify a spend against a budget, both in cents. Thresholds are the
    /// 80/100/120 percent lines; comparison stays in integer arithmetic.
    pub fn classify(spend_cents: UsdCents, max_budget_cents: UsdCents) -> BudgetState {
        if max_budget_cents == 0 {
            return BudgetState::HardStop;
        }
        let scaled = (spend_cents as u128) * 100;
        let budget = max_budget_cents as u128;
        if scaled >= budget * BUDGET_HARD_STOP_PERCENT as u128 {
            BudgetState::HardStop
        } else if scaled >= budget * BUDGET_REAUTH_PERCENT as u128 {
            BudgetState::ReauthorizationRequired
        } else if scaled >= budget * BUDGET_SOFT_ALERT_PERCENT as u128 {
            BudgetState::SoftAlert
        } else {
            BudgetState::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetState::Ok => "ok",
            BudgetState::SoftAlert => "soft_alert",
            BudgetState::ReauthorizationRequired => "reauthorization_required",
            BudgetState::HardStop => "hard_stop",
        }
    }
}

// ── Idempotency ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

/// One reservation under the (tenant, actor, method, route, key) primary key.
/// The request hash binds the key to a payload; the cached response makes
/// replays byte-identical.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant: String,
    pub actor: String,
    pub method: String,
    pub route: String,
    pub key: String,
    /// SHA-256 hex of the raw request body.
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl IdempotencyRecord {
    /// The sled key for this record's primary key.
    pub fn storage_key(
        tenant: &str,
        actor: &str,
        method: &str,
        route: &str,
        key: &str,
    ) -> Vec<u8> {
        format!("{tenant}\u{1f}{actor}\u{1f}{method}\u{1f}{route}\u{1f}{key}").into_bytes()
    }
}
