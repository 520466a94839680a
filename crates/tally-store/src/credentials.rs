//! Credential hashing for the seeded administrator
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$...`) with a fresh
//! random salt per hash.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

const SALT_LEN: usize = 16;

/// Error type for credential hashing
#[derive(Debug, thiserror::Error)]
#[error("Credential hashing failed: {0}")]
pub struct CredentialError(String);

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let mut bytes = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut bytes);
    let salt = SaltString::encode_b64(&bytes).map_err(|e| CredentialError(e.to_string()))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CredentialError(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a password against a hash produced by [`hash_password`].
///
/// Anything that is not a PHC string never verifies.
pub fn verify_password(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_and_verifiable() {
        let hash = hash_password("secret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "secret"));
        assert!(!verify_password(&hash, "Secret"));
    }

    #[test]
    fn test_each_hash_gets_its_own_salt() {
        let a = hash_password("secret").unwrap();
        let b = hash_password("secret").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&a, "secret"));
        assert!(verify_password(&b, "secret"));
    }

    #[test]
    fn test_foreign_formats_never_verify() {
        assert!(!verify_password("plain", "plain"));
        assert!(!verify_password("", ""));
        assert!(!verify_password(
            "sha256$salt$2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b",
            "secret"
        ));
    }
}
