//! Argon2id hashing for renewal secrets at rest.
//!
//! Hashes are stored in PHC string format so salt and cost parameters travel
//! with the hash. An optional server-side pepper is mixed in as the Argon2
//! secret input.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{self, SaltString},
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

use super::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SecretHasher {
    params: Params,
    pepper: Option<SecretString>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self::new(Params::default(), None)
    }
}

impl SecretHasher {
    #[must_use]
    pub fn new(params: Params, pepper: Option<SecretString>) -> Self {
        Self { params, pepper }
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.expose_secret().as_bytes(),
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|err| Error::internal("failed to initialize Argon2id", err)),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    /// Hash a renewal secret with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if Argon2 cannot be initialized or hashing fails.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| Error::internal("failed to hash renewal secret", err))?;
        Ok(hash.to_string())
    }

    /// Check a candidate secret against a stored PHC hash.
    ///
    /// Returns `Ok(false)` only for a genuine mismatch; a malformed hash or a
    /// primitive failure is an error, never a silent `false`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the stored hash cannot be parsed or Argon2 fails.
    pub fn verify(&self, stored_hash: &str, candidate: &str) -> Result<bool> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|err| Error::internal("invalid stored renewal hash", err))?;
        match self.argon2()?.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(Error::internal("failed to verify renewal secret", err)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> SecretHasher {
    // Minimum Argon2 cost keeps the test suite fast.
    let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default();
    SecretHasher::new(params, None)
}
