pub mod budget;
pub mod delegations;
pub mod diagnostics;
pub mod federation;
pub mod identity;
pub mod reliability;
pub mod tokens;

use agenthub_core::error::CoreError;
use agenthub_core::identity::AgentIdentity;
use agenthub_core::types::AgentId;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Load an agent and require the caller to own it. Platform owners may act
/// across their whole tenant; a foreign agent resolves as not-found so ids
/// do not leak across tenants.
pub(crate) fn require_owned_agent(
    state: &AppState,
    principal: &Principal,
    agent_id: &AgentId,
) -> Result<AgentIdentity, ApiError> {
    let agent = state
        .db
        .get_agent(agent_id)?
        .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))?;
    if agent.owner != principal.owner && !principal.is_platform_owner() {
        return Err(ApiError(CoreError::AgentNotFound(agent_id.to_string())));
    }
    Ok(agent)
}
