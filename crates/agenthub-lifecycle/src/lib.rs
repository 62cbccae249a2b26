//! agenthub-lifecycle
//!
//! The delegation execution plane: the six-stage durable lifecycle engine
//! with escrow and a fixed retry matrix, the per-token budget state machine,
//! and the SLO circuit breaker that gates new work.

pub mod breaker;
pub mod budget;
pub mod engine;

pub use breaker::{Breaker, BreakerMetrics, BreakerState, Sample};
pub use budget::{BudgetEngine, BudgetReport};
pub use engine::{DelegationOutcome, DelegationRequest, LifecycleEngine};
