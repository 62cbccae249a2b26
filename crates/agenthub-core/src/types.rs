use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Money in integer USD cents. The wire carries `*_usd` JSON numbers; the
/// conversion happens once at the DTO boundary so threshold comparisons
/// never touch floats.
pub type UsdCents = u64;

/// Convert a wire `*_usd` number to cents, rounding to the nearest cent.
pub fn usd_to_cents(usd: f64) -> UsdCents {
    (usd * 100.0).round().max(0.0) as UsdCents
}

/// Convert cents back to a wire `*_usd` number.
pub fn cents_to_usd(cents: UsdCents) -> f64 {
    cents as f64 / 100.0
}

/// A set of dotted scope strings, ordered for canonical serialization.
pub type ScopeSet = BTreeSet<String>;

/// `true` iff every scope in `child` is covered by `parent`.
/// The platform wildcard `*` covers everything.
pub fn scopes_subset(child: &ScopeSet, parent: &ScopeSet) -> bool {
    if parent.contains("*") {
        return true;
    }
    child.iter().all(|s| parent.contains(s))
}

/// Intersection of two scope sets; `*` on one side yields the other side.
pub fn scopes_intersect(a: &ScopeSet, b: &ScopeSet) -> ScopeSet {
    if a.contains("*") {
        return b.clone();
    }
    if b.contains("*") {
        return a.clone();
    }
    a.intersection(b).cloned().collect()
}

// ── Identifier newtypes ──────────────────────────────────────────────────────
//
// Ids are prefixed UUIDv4 strings (`agt-…`, `cred-…`, `tok-…`). The prefix
// makes log lines and audit trails self-describing; the string form doubles
// as the sled key bytes.

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Mint a fresh id with the type prefix.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4()))
            }

            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of an [`crate::identity::AgentIdentity`].
    AgentId,
    "agt"
);
string_id!(
    /// Identifier of an [`crate::identity::AgentCredential`].
    CredentialId,
    "cred"
);
string_id!(
    /// Identifier (jti) of a [`crate::identity::DelegationToken`].
    TokenId,
    "tok"
);
string_id!(
    /// Identifier of a [`crate::delegation::DelegationRecord`].
    DelegationId,
    "del"
);
string_id!(
    /// Identifier of a trust-registry domain.
    DomainId,
    "dom"
);
string_id!(
    /// Identifier of an [`crate::identity::AgentAttestation`].
    AttestationId,
    "att"
);
string_id!(
    /// Identifier of an append-only event row (revocation, budget, outbox).
    EventId,
    "evt"
);
