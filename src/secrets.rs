//! Random credential material and the hash-at-rest helpers shared by every
//! short-lived protocol artifact.

use base64ct::Encoding;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// 192-bit random identifier/secret, base64url without padding.
pub fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// 256-bit random secret for codes and tokens handed to clients.
pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// Generate 8-character base-20 user code in format XXXX-XXXX
/// Alphabet: BCDFGHJKLMNPQRSTVWXZ (consonants only, no ambiguous chars)
/// Entropy: 20^8 = ~43 bits
pub fn generate_user_code() -> String {
    const ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(9);

    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        let idx = rng.gen_range(0..ALPHABET.len());
        code.push(ALPHABET[idx] as char);
    }

    code
}

/// SHA-256 of a secret, base64url without padding. Stored value for every
/// code/token; lookups recompute and compare by primary key.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    base64ct::Base64UrlUnpadded::encode_string(&hasher.finalize())
}

/// PKCE S256 challenge derivation (RFC 7636).
pub fn pkce_s256(verifier: &str) -> String {
    hash_secret(verifier)
}

/// Normalized user-code comparison hash: strip the display hyphen and
/// uppercase before hashing so user input is forgiving.
pub fn hash_user_code(user_code: &str) -> String {
    let normalized: String = user_code
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    hash_secret(&normalized)
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_code_format() {
        let code = generate_user_code();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert!(code
            .chars()
            .filter(|c| *c != '-')
            .all(|c| "BCDFGHJKLMNPQRSTVWXZ".contains(c)));
    }

    #[test]
    fn user_code_hash_ignores_hyphen_and_case() {
        assert_eq!(hash_user_code("BCDF-GHJK"), hash_user_code("bcdfghjk"));
    }

    #[test]
    fn hashes_are_deterministic_and_distinct() {
        assert_eq!(hash_secret("a"), hash_secret("a"));
        assert_ne!(hash_secret("a"), hash_secret("b"));
    }

    #[test]
    fn pkce_s256_matches_rfc_7636_appendix_b() {
        // Test vector from RFC 7636 Appendix B
        assert_eq!(
            pkce_s256("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
