//! agenthub-crypto
//!
//! Crypto primitives for the identity/delegation plane: HMAC-SHA256 signing
//! and verification, canonical JSON, constant-time comparison, request
//! hashing and high-entropy secret generation.
//!
//! None of these functions panic or return errors on bad input — signature
//! and hash mismatches surface as `false`.

pub mod canonical;
pub mod secret;
pub mod signer;

pub use canonical::canonical;
pub use secret::{random_secret, Secret};
pub use signer::{constant_time_eq, hash_secret, request_hash, sign, verify};
