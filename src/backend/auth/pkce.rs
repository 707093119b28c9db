//! PKCE S256 challenge generation
//!
//! The federated sign-in flow runs as a public client, so the authorization
//! code is bound to a one-time verifier (RFC 7636). The verifier never
//! leaves the process until the code exchange; the authorize URL carries
//! only its SHA-256 challenge.

use base64::Engine as _;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its derived S256 challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters).
    pub verifier: String,

    /// base64url (no padding) SHA-256 of the verifier's ASCII bytes.
    pub challenge: String,
}

/// Generates a fresh PKCE S256 challenge.
///
/// # Examples
///
/// ```
/// use smartmark::backend::auth::pkce::generate;
///
/// let pkce = generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_ne!(pkce.verifier, pkce.challenge);
/// ```
pub fn generate() -> PkceChallenge {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);

    PkceChallenge {
        challenge: challenge_for(&verifier),
        verifier,
    }
}

/// Computes the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_is_43_url_safe_chars() {
        let pkce = generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let pkce = generate();
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
        assert_eq!(pkce.challenge.len(), 43);
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_consecutive_challenges_differ() {
        assert_ne!(generate().verifier, generate().verifier);
    }
}
