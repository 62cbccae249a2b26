use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroize;

/// Generate `n` bytes of OS randomness, URL-safe base64 (no padding).
/// Default length for credentials and bearer secrets is 32 bytes.
pub fn random_secret(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = URL_SAFE_NO_PAD.encode(&bytes);
    bytes.zeroize();
    encoded
}

/// A process-lifetime signing secret. Held behind a wiping wrapper so the
/// key material does not linger after drop; never printed by Debug and
/// deliberately not serializable.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_str_value(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_unique_and_urlsafe() {
        let a = random_secret(32);
        let b = random_secret(32);
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        // 32 bytes → 43 base64url chars without padding.
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn secret_debug_hides_content() {
        let s = Secret::from_str_value("super-secret");
        assert_eq!(format!("{s:?}"), "Secret(12 bytes)");
    }
}
