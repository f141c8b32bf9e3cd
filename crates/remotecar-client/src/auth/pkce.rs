//! PKCE (Proof Key for Code Exchange) for the authorization code flow

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE challenge method constant.
pub const PKCE_METHOD: &str = "S256";

/// Characters allowed in verifier and state tokens (RFC 7636 unreserved chars).
const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const VERIFIER_LENGTH: usize = 86;
const STATE_LENGTH: usize = 22;

/// Verifier, challenge and state of one login attempt
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Sent with the token exchange
    pub verifier: String,
    /// SHA-256 of the verifier, base64url without padding
    pub challenge: String,
    /// Opaque value echoed by the authorization server
    pub state: String,
}

impl Pkce {
    /// Generate a fresh set of values.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_token(VERIFIER_LENGTH);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(STATE_LENGTH),
        }
    }
}

/// Random token of `len` unreserved characters
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// Compute the S256 challenge from a verifier.
pub fn challenge_for(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
