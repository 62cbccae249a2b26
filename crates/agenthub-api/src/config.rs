use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use agenthub_crypto::Secret;

/// Access-enforcement mode. `enforce` (default) rejects failed auth; `warn`
/// logs and continues — strictly for migration windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Enforce,
    Warn,
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enforce" => Ok(AccessMode::Enforce),
            "warn" => Ok(AccessMode::Warn),
            other => Err(format!("unknown access mode: {other} (expected enforce|warn)")),
        }
    }
}

/// Process-wide immutable configuration snapshot, loaded once at startup.
/// There is intentionally no reload path: configuration changes require a
/// rolling restart so no two requests ever see different secrets.
pub struct RuntimeConfig {
    /// Platform API key → owner principal.
    pub api_keys: HashMap<String, String>,
    /// Federation domain → gateway token (consumed by the external
    /// federation gateway; reported by diagnostics).
    pub federation_domain_tokens: HashMap<String, String>,
    /// Signing secret for `Authorization: Bearer` scoped tokens.
    pub bearer_secret: Secret,
    pub access_mode: AccessMode,
    pub latency_slo_ms: u64,
    pub breaker_window: usize,
    /// Per-request budget; expiry surfaces as `504` and resets the
    /// idempotency reservation.
    pub request_timeout: Duration,
    /// Dev credit granted to each freshly registered agent's delegation
    /// balance, in cents. Escrow debits draw from this.
    pub initial_balance_cents: u64,
    /// Secret name → byte length, for the diagnostics report. Values never
    /// leave the config.
    pub secret_lengths: BTreeMap<String, usize>,
}
