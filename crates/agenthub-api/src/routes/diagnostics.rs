use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::config::AccessMode;
use crate::state::AppState;

/// `GET /v1/diagnostics/config` — presence and shape of every required
/// startup input, without revealing any value. Public: it leaks nothing an
/// attacker can use.
pub async fn config_report(State(state): State<AppState>) -> Json<serde_json::Value> {
    let secrets: serde_json::Map<String, serde_json::Value> = state
        .config
        .secret_lengths
        .iter()
        .map(|(name, len)| {
            (
                name.clone(),
                json!({
                    "present": *len > 0,
                    "strong": *len >= 16,
                }),
            )
        })
        .collect();

    Json(json!({
        "secrets": secrets,
        "api_keys": {
            "present": !state.config.api_keys.is_empty(),
            "count": state.config.api_keys.len(),
        },
        "federation_domains": {
            "present": !state.config.federation_domain_tokens.is_empty(),
            "count": state.config.federation_domain_tokens.len(),
        },
        "access_mode": match state.config.access_mode {
            AccessMode::Enforce => "enforce",
            AccessMode::Warn => "warn",
        },
        "store": {
            "agents": state.db.count_agents(),
            "tokens": state.db.count_tokens(),
            "delegations": state.db.count_delegations(),
            "outbox_backlog": state.db.outbox_len(),
        },
    }))
}
