//! Admin password check.
//!
//! Only an argon2 PHC string of the password is configured; the plaintext
//! never leaves the login handler.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::debug;

const SALT_BYTES: usize = 16;

#[derive(Clone)]
pub struct AdminAuthenticator {
    hash: SecretString,
}

impl fmt::Debug for AdminAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAuthenticator").finish_non_exhaustive()
    }
}

impl AdminAuthenticator {
    /// Wrap a PHC hash, rejecting strings that do not parse.
    ///
    /// # Errors
    /// Returns an error if `hash` is not a valid PHC string.
    pub fn new(hash: SecretString) -> Result<Self> {
        PasswordHash::new(hash.expose_secret())
            .map_err(|e| anyhow!("invalid admin password hash: {e}"))?;
        Ok(Self { hash })
    }

    /// Constant-time check of `password` against the configured hash.
    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(self.hash.expose_secret()) else {
            return false;
        };
        let ok = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        if !ok {
            debug!("admin password rejected");
        }
        ok
    }
}

/// Hash `password` with argon2id default parameters.
///
/// # Errors
/// Returns an error if the entropy source or the hasher fails.
pub fn hash_password(password: &str) -> Result<String> {
    hash_with(&Argon2::default(), password)
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_BYTES];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("failed to encode salt: {e}"))?;
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}
