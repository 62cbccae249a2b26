//! agenthub-policy
//!
//! ABAC policy evaluator. Evaluation is deterministic: identical inputs
//! yield identical decisions with identical signatures. Decisions are signed
//! with the dedicated policy secret and carry enough explainability for an
//! operator to reconstruct the outcome without replaying state.

pub mod abac;

pub use abac::PolicyEvaluator;
