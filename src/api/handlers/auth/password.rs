//! Primary factor: argon2 password hashing.
//!
//! Hashing runs on the blocking pool so a burst of logins does not stall the
//! async workers.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;

pub(super) const MIN_PASSWORD_LENGTH: usize = 8;

// Verified against when the email is unknown, so both login failures cost one
// argon2 verification.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_blocking("phishlab-unknown-principal").ok());

fn hash_blocking(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

fn verify_blocking(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| anyhow!("invalid stored hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

pub(super) async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .context("password hashing task failed")?
}

pub(super) async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
        .await
        .context("password verification task failed")?
}

/// Burn one verification's worth of work for a principal that does not exist.
pub(super) async fn verify_dummy(password: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let hash = DUMMY_HASH
            .as_deref()
            .ok_or_else(|| anyhow!("dummy password hash unavailable"))?;
        verify_blocking(&password, hash).map(|_| ())
    })
    .await
    .context("password verification task failed")?
}
