use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `payload` with `secret`, as lowercase hex.
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `signature_hex` against a fresh HMAC of `payload`. Constant-time;
/// malformed hex yields `false` rather than an error.
pub fn verify(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(given) = hex::decode(signature_hex) else {
        return false;
    };
    let expected = {
        let mut mac = HmacSha256::new_from_slice(secret)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes()
    };
    constant_time_eq(expected.as_slice(), &given)
}

/// Constant-time byte-slice equality. Length mismatches return `false`
/// without short-circuiting on content.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Derive the stored hash of a credential secret:
/// HMAC-SHA256(identity secret, plaintext) as lowercase hex. The lookup index
/// keys on this value, so equality of hashes implies equality of secrets.
pub fn hash_secret(secret_key: &[u8], plaintext: &str) -> String {
    sign(secret_key, plaintext.as_bytes())
}

/// SHA-256 of raw bytes as lowercase hex. Used to bind idempotency keys to
/// request payloads.
pub fn request_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
