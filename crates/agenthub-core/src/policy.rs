//! agenthub-core::policy
//!
//! Data structures for ABAC policy evaluation. The evaluator itself lives in
//! `agenthub-policy`; these are the persisted/audited shapes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::Timestamp;

/// Attributes of the requesting principal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrincipalContext {
    pub tenant_id: String,
    pub allowed_actions: BTreeSet<String>,
    pub mfa_present: bool,
}

/// Attributes of the target resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceContext {
    pub tenant_id: String,
    /// Additional resource attributes carried through for audit.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Ambient conditions at evaluation time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub requires_mfa: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

/// A signed, explainable policy decision. The explainability fields are
/// sufficient for an operator to reconstruct the outcome without replaying
/// state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub violation_codes: Vec<String>,
    pub warning_codes: Vec<String>,
    pub allow_codes: Vec<String>,
    pub evaluated_fields: Vec<String>,
    /// HMAC-SHA256(policy secret, canonical(decision payload)) as hex.
    pub decision_signature: String,
    pub signed_at: Timestamp,
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// The canonical payload the decision signature covers — the decision minus
/// its own signature.
#[derive(Clone, Debug, Serialize)]
pub struct DecisionPayload<'a> {
    pub decision: Decision,
    pub violation_codes: &'a [String],
    pub warning_codes: &'a [String],
    pub allow_codes: &'a [String],
    pub evaluated_fields: &'a [String],
    pub signed_at: Timestamp,
}

impl PolicyDecision {
    pub fn payload(&self) -> DecisionPayload<'_> {
        DecisionPayload {
            decision: self.decision,
            violation_codes: &self.violation_codes,
            warning_codes: &self.warning_codes,
            allow_codes: &self.allow_codes,
            evaluated_fields: &self.evaluated_fields,
            signed_at: self.signed_at,
        }
    }
}
