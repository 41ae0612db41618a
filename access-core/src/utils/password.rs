//! Login secrets and their Argon2id PHC hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// A principal's login secret. Never printed, not even by `{:?}`.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(**redacted**)")
    }
}

/// PHC-encoded hash as stored on a `PrincipalRecord`.
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Argon2id with a fresh salt; the salt and cost parameters travel inside
/// the PHC string.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(PasswordHashString::new(phc.to_string()))
}

/// `Ok(false)` on a mismatch. An error means the stored hash is unreadable.
pub fn verify_password(password: &Password, stored: &PasswordHashString) -> Result<bool, anyhow::Error> {
    let parsed = PasswordHash::new(stored.as_str())
        .map_err(|e| anyhow::anyhow!("Stored password hash is malformed: {}", e))?;

    match Argon2::default().verify_password(password.as_str().as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_argon2id_phc() {
        let hash = hash_password(&Password::new("correct horse battery")).unwrap();
        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(!hash.as_str().contains("correct horse battery"));
    }

    #[test]
    fn test_only_the_original_secret_matches() {
        let secret = Password::new("correct horse battery");
        let hash = hash_password(&secret).unwrap();

        assert!(verify_password(&secret, &hash).unwrap());
        assert!(!verify_password(&Password::new("correct horse battery!"), &hash).unwrap());
    }

    #[test]
    fn test_salts_differ_between_registrations() {
        let secret = Password::new("same-secret-twice");
        let first = hash_password(&secret).unwrap();
        let second = hash_password(&secret).unwrap();

        assert_ne!(first.as_str(), second.as_str());
        assert!(verify_password(&secret, &second).unwrap());
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert!(!format!("{:?}", password).contains("hunter2"));
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let hash = PasswordHashString::new("not-a-phc-string".to_string());
        assert!(verify_password(&Password::new("anything"), &hash).is_err());
    }
}
