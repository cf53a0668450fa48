//! Credential hashing. Argon2 with a per-password random salt; verification
//! never short-circuits on its own, the comparison is argon2's.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hashing failed");
            anyhow::anyhow!("password hashing failed: {e}")
        })?
        .to_string();
    Ok(hash)
}

/// Returns `Ok(false)` for a wrong password; `Err` only when the stored hash
/// itself cannot be parsed.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "stored password hash is malformed");
        anyhow::anyhow!("malformed password hash: {e}")
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_accepts_the_password() {
        let hash = hash_password("Secur3P@ssw0rd!").expect("hash");
        assert!(verify_password("Secur3P@ssw0rd!", &hash).expect("verify"));
    }

    #[test]
    fn verify_rejects_a_wrong_password() {
        let hash = hash_password("original").expect("hash");
        assert!(!verify_password("guessed", &hash).expect("verify"));
    }

    #[test]
    fn hashes_are_salted_per_call() {
        let a = hash_password("same-input").expect("hash");
        let b = hash_password("same-input").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_stored_hash_is_an_error_not_a_mismatch() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn parseable_but_unsupported_hash_is_a_mismatch() {
        // A bare `$argon2$...` string passes PHC parsing (algorithm id plus
        // salt) but can never verify, so it reads as a wrong password, not
        // as a malformed hash.
        assert!(!verify_password("anything", "$argon2$garbage").expect("verify"));
    }
}
