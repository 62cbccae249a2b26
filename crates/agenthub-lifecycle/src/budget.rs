use std::sync::Arc;

use tracing::{info, warn};

use agenthub_core::delegation::{BudgetEvent, BudgetState};
use agenthub_core::error::CoreError;
use agenthub_core::identity::DelegationToken;
use agenthub_core::types::{cents_to_usd, EventId, Timestamp, TokenId, UsdCents};
use agenthub_store::StateDb;

/// Snapshot of a token's budget position.
#[derive(Clone, Copy, Debug)]
pub struct BudgetReport {
    pub state: BudgetState,
    pub spend_cents: UsdCents,
    pub max_budget_cents: Option<UsdCents>,
    pub spend_ratio: f64,
    pub event_count: usize,
}

impl BudgetReport {
    pub fn spend_usd(&self) -> f64 {
        cents_to_usd(self.spend_cents)
    }
}

/// Per-token budget state machine.
///
/// The state is a pure function of accumulated spend, so it is monotone:
/// events only ever add cost, and `ok → soft_alert → reauth → hard_stop`
/// can never run backwards for a given token.
pub struct BudgetEngine {
    pub db: Arc<StateDb>,
}

impl BudgetEngine {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Evaluate a token's current budget state.
    pub fn evaluate(&self, token_id: &TokenId) -> Result<BudgetReport, CoreError> {
        let token = self
            .db
            .get_token(token_id)?
            .ok_or_else(|| CoreError::TokenNotFound(token_id.to_string()))?;
        self.evaluate_token(&token)
    }

    pub fn evaluate_token(&self, token: &DelegationToken) -> Result<BudgetReport, CoreError> {
        let spend = self.db.budget_total(&token.token_id)?;
        let event_count = self.db.iter_budget_events(&token.token_id)?.len();
        Ok(match token.max_budget_cents {
            // No ceiling: spend is tracked but never gates.
            None => BudgetReport {
                state: BudgetState::Ok,
                spend_cents: spend,
                max_budget_cents: None,
                spend_ratio: 0.0,
                event_count,
            },
            Some(max) => BudgetReport {
                state: BudgetState::classify(spend, max),
                spend_cents: spend,
                max_budget_cents: Some(max),
                spend_ratio: if max == 0 {
                    f64::INFINITY
                } else {
                    spend as f64 / max as f64
                },
                event_count,
            },
        })
    }

    /// Record a cost-bearing event against a token.
    ///
    /// Evaluation and insertion run under the store's state guard, so two
    /// concurrent writers cannot both slip past `hard_stop`: whichever lands
    /// second sees the first one's spend. A token already at `hard_stop`
    /// rejects the event before it is written.
    pub fn record_event(
        &self,
        token_id: &TokenId,
        actor: &str,
        cost_cents: UsdCents,
        description: &str,
        now: Timestamp,
    ) -> Result<BudgetReport, CoreError> {
        let _guard = self.db.lock_state();

        let before = self.evaluate(token_id)?;
        match before.state {
            BudgetState::HardStop => {
                warn!(token_id = %token_id, ratio = before.spend_ratio, "budget hard stop");
                return Err(CoreError::BudgetHardStop {
                    spend_ratio: before.spend_ratio,
                });
            }
            // Auto-reauthorization is disabled: spend stops at the 100% line
            // until an operator intervenes, short of the 120% hard stop.
            BudgetState::ReauthorizationRequired => {
                return Err(CoreError::BudgetReauthRequired {
                    spend_ratio: before.spend_ratio,
                });
            }
            BudgetState::Ok | BudgetState::SoftAlert => {}
        }

        let event = BudgetEvent {
            event_id: EventId::generate(),
            token_id: token_id.clone(),
            actor: actor.to_string(),
            cost_cents,
            description: description.to_string(),
            created_at: now,
        };
        self.db.append_budget_event(&event)?;
        let after = self.evaluate(token_id)?;
        info!(
            token_id = %token_id,
            cost_cents,
            state = after.state.as_str(),
            "recorded budget event"
        );
        Ok(after)
    }
}
