//! Password hashing and verification using Argon2id
//!
//! Hashes are PHC strings (algorithm, parameters, salt and digest in one
//! value), so verification needs nothing but the stored string. The cost
//! parameters are fixed per deployment through `PasswordHashConfig`.
//!
//! Login always runs a verification, even for unknown accounts, against a
//! dummy hash produced with the same parameters at startup. Both paths cost
//! one full Argon2 evaluation.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use rand::Rng;
use thiserror::Error;
use tplatform_core::PasswordHashConfig;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),
}

/// One-way credential hashing
pub trait CredentialHasher: Send + Sync {
    /// Produce a salted hash of `password`
    fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// Check `password` against `hash`. Mismatches and unparseable hashes
    /// both yield `false`.
    fn verify(&self, password: &str, hash: &str) -> bool;

    /// Hash with the same cost as real accounts, used when the subject is unknown
    fn dummy_hash(&self) -> &str;
}

/// Argon2id implementation of [`CredentialHasher`]
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl std::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Hasher")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

impl Argon2Hasher {
    /// Build a hasher and precompute its dummy hash
    pub fn new(config: &PasswordHashConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(32),
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let filler: [u8; 24] = rand::thread_rng().gen();
        let dummy_hash = hash_with(&argon2, &filler)?;

        Ok(Self { argon2, dummy_hash })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        hash_with(&self.argon2, password.as_bytes())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!(op = "Argon2Hasher::verify", "stored hash is not a PHC string");
            return false;
        };

        // Parameters come from the PHC string itself
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &[u8]) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(password, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

#[cfg(test)]
pub(crate) fn test_config() -> PasswordHashConfig {
    PasswordHashConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}
