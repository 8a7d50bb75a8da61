//! Credential hashing and verification.
//!
//! Centralizes Argon2 handling for identity credentials. Hashing is CPU bound,
//! so the async entry points run it on the blocking pool.

use crate::config::SecurityConfig;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use thiserror::Error;

/// Credential hashing errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),
    #[error("password hash error: {0}")]
    Hash(argon2::password_hash::Error),
    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Argon2 hasher configured from `[security]`.
#[derive(Debug, Clone)]
pub struct Credentials {
    params: Params,
}

impl Credentials {
    /// Build a hasher with the configured cost parameters.
    pub fn new(config: &SecurityConfig) -> Result<Self, CredentialError> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
            None,
        )
        .map_err(CredentialError::Params)?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a plaintext credential into a PHC string.
    pub fn hash_now(&self, plain: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        Ok(self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(CredentialError::Hash)?
            .to_string())
    }

    /// Check a plaintext credential against a stored PHC string.
    ///
    /// A malformed stored hash is an error, not a mismatch.
    pub fn verify_now(&self, plain: &str, stored: &str) -> Result<bool, CredentialError> {
        let hash = PasswordHash::new(stored).map_err(CredentialError::Hash)?;
        Ok(self.argon2().verify_password(plain.as_bytes(), &hash).is_ok())
    }

    /// Hash on the blocking pool.
    pub async fn hash(&self, plain: &str) -> Result<String, CredentialError> {
        let this = self.clone();
        let plain = plain.to_string();
        tokio::task::spawn_blocking(move || this.hash_now(&plain)).await?
    }

    /// Verify on the blocking pool.
    pub async fn verify(&self, plain: &str, stored: &str) -> Result<bool, CredentialError> {
        let this = self.clone();
        let plain = plain.to_string();
        let stored = stored.to_string();
        tokio::task::spawn_blocking(move || this.verify_now(&plain, &stored)).await?
    }
}

#[cfg(test)]
pub(crate) fn cheap_credentials() -> Credentials {
    Credentials::new(&SecurityConfig {
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        argon2_parallelism: 1,
    })
    .unwrap()
}
