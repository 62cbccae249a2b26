use serde::{Deserialize, Serialize};

use agenthub_core::types::{EventId, Timestamp};

/// An audit/metering event written in the same guarded write as the state
/// change that produced it. A dispatcher drains the tree and forwards to
/// downstream consumers (at-least-once).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub event_id: EventId,
    /// Event family, e.g. `revocation`, `usage_signal`, `policy_decision`,
    /// `budget_event`.
    pub kind: String,
    /// Canonical JSON payload for the downstream consumer.
    pub payload_json: String,
    pub created_at: Timestamp,
}
