use std::sync::{Arc, Mutex};

use agenthub_identity::{IdentityRegistry, RevocationEngine, TokenEngine, TrustRegistry};
use agenthub_lifecycle::{Breaker, BudgetEngine, LifecycleEngine};
use agenthub_policy::PolicyEvaluator;
use agenthub_store::StateDb;

use crate::config::RuntimeConfig;

/// Shared state handed to every handler. All engines sit behind `Arc`; the
/// breaker is the only piece of mutable in-process state and is rebuilt
/// from the store at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<StateDb>,
    pub registry: Arc<IdentityRegistry>,
    pub tokens: Arc<TokenEngine>,
    pub revocation: Arc<RevocationEngine>,
    pub federation: Arc<TrustRegistry>,
    pub policy: Arc<PolicyEvaluator>,
    pub budget: Arc<BudgetEngine>,
    pub lifecycle: Arc<LifecycleEngine>,
    pub breaker: Arc<Mutex<Breaker>>,
    pub config: Arc<RuntimeConfig>,
}
