//! ─── AgentHub Protocol Constants ────────────────────────────────────────────
//!
//! Limits, thresholds and windows for the identity/delegation control plane.
//! All ratios are expressed in integer percent so threshold checks stay in
//! integer arithmetic.

// ── Credentials ──────────────────────────────────────────────────────────────

/// Minimum credential lifetime (seconds).
pub const CREDENTIAL_MIN_TTL_SECS: i64 = 300;

/// Maximum credential lifetime: 30 days (seconds).
pub const CREDENTIAL_MAX_TTL_SECS: i64 = 30 * 24 * 3600;

/// Default credential lifetime when the caller does not ask for one: 24 hours.
pub const CREDENTIAL_DEFAULT_TTL_SECS: i64 = 24 * 3600;

/// Grace window during which a `rotated` credential still verifies (seconds).
pub const ROTATION_OVERLAP_GRACE_SECS: i64 = 300;

/// Byte length of a freshly generated credential/bearer secret.
pub const SECRET_BYTE_LENGTH: usize = 32;

// ── Delegation tokens ────────────────────────────────────────────────────────

/// Maximum delegation chain depth (root token is depth 0).
pub const MAX_CHAIN_DEPTH: u8 = 5;

/// Maximum delegation-token lifetime: 30 days (seconds).
pub const TOKEN_MAX_TTL_SECS: i64 = 30 * 24 * 3600;

// ── Budget thresholds (percent of max_budget) ────────────────────────────────

pub const BUDGET_SOFT_ALERT_PERCENT: u64 = 80;
pub const BUDGET_REAUTH_PERCENT: u64 = 100;
pub const BUDGET_HARD_STOP_PERCENT: u64 = 120;

// ── Delegation lifecycle ─────────────────────────────────────────────────────

/// Heartbeat staleness after which a `running` delegation is reclaimed (seconds).
pub const HEARTBEAT_RECLAIM_SECS: i64 = 30;

/// Structured-output contract marker checked at the delivery stage.
pub const DELEGATION_CONTRACT_VERSION: &str = "delegation-contract-v2";

// ── Reliability / circuit breaker ────────────────────────────────────────────

/// Default sliding-window size (most recent delegation samples).
pub const BREAKER_DEFAULT_WINDOW: usize = 50;

/// Window size bounds for the dashboard query and configuration.
pub const BREAKER_MIN_WINDOW: usize = 1;
pub const BREAKER_MAX_WINDOW: usize = 1000;

/// Minimum samples before the breaker enforces.
pub const BREAKER_MIN_SAMPLES: usize = 10;

/// Error-rate threshold (percent) that opens the breaker.
pub const BREAKER_ERROR_RATE_PERCENT: u64 = 30;

/// Hard-stop-rate threshold (percent) that opens the breaker.
pub const BREAKER_HARD_STOP_RATE_PERCENT: u64 = 20;

/// p95 latency bound expressed as percent of the latency SLO (150 = 1.5×).
pub const BREAKER_LATENCY_SLO_PERCENT: u64 = 150;

/// Consecutive successes that move an open breaker to half-open.
pub const BREAKER_HALF_OPEN_SAMPLES: usize = 5;

/// Default p95 latency SLO (milliseconds).
pub const DEFAULT_LATENCY_SLO_MS: u64 = 2_000;

// ── HTTP surface ─────────────────────────────────────────────────────────────

/// Response header set on idempotent replays.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "X-Agenthub-Idempotent-Replay";

/// Request header carrying the client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Request header carrying a delegation bearer token (`<jti>.<signature>`).
pub const DELEGATION_TOKEN_HEADER: &str = "X-Delegation-Token";

/// Request header carrying a platform API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default per-request budget (seconds); expiry surfaces as `504`.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
