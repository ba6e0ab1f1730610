//! Credential verification seam.
//!
//! The wire contract compares passwords as raw fixed-size byte buffers.
//! That comparison lives behind a trait so a hashed scheme can be swapped
//! in later without touching the protocol or router layers.

use shared::User;

/// Decides whether a supplied password authenticates a stored user.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, user: &User, supplied_password: &[u8]) -> bool;
}

/// Byte-for-byte comparison against the stored fixed-size buffer. This is
/// the wire-compatible scheme: passwords are zero-padded, never hashed.
#[derive(Debug, Default)]
pub struct ExactMatchVerifier;

impl CredentialVerifier for ExactMatchVerifier {
    fn verify(&self, user: &User, supplied_password: &[u8]) -> bool {
        user.password[..] == *supplied_password
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::pad_credential;

    fn user_with_password(password: &[u8]) -> User {
        User {
            username: pad_credential(b"alice").unwrap(),
            password: pad_credential(password).unwrap(),
            is_admin: false,
        }
    }

    #[test]
    fn test_exact_match_accepts_padded_password() {
        let verifier = ExactMatchVerifier;
        let user = user_with_password(b"pw1");
        assert!(verifier.verify(&user, &pad_credential(b"pw1").unwrap()));
    }

    #[test]
    fn test_exact_match_rejects_wrong_password() {
        let verifier = ExactMatchVerifier;
        let user = user_with_password(b"pw1");
        assert!(!verifier.verify(&user, &pad_credential(b"pw2").unwrap()));
        // Unpadded input differs from the stored fixed-size buffer.
        assert!(!verifier.verify(&user, b"pw1"));
    }
}
