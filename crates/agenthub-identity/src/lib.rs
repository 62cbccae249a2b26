//! agenthub-identity
//!
//! The identity plane's engines: agent/credential registry, delegation token
//! issue/verify/chain, revocation (single-target and kill-switch cascade),
//! and the federation trust registry.

pub mod federation;
pub mod registry;
pub mod revocation;
pub mod tokens;

pub use federation::TrustRegistry;
pub use registry::IdentityRegistry;
pub use revocation::RevocationEngine;
pub use tokens::{IssueRequest, IssuedToken, TokenEngine, VerifiedToken};
