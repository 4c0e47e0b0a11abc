//! Persistence seams for principals, hardware authenticators and the
//! revocation ledger.
//!
//! Every mutation is a single-row write (or a single statement) so no caller
//! needs a multi-step transaction. The ledger's uniqueness on the verbatim
//! credential string is the only concurrency mechanism: a duplicate revoke is
//! reported as [`RevokeOutcome::AlreadyRevoked`], never as an error.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Principal row.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub totp_secret: Option<String>,
    pub pending_challenge: Option<String>,
    pub hardware_bound: bool,
    pub created_at: DateTime<Utc>,
}

/// Hardware credential row. `public_key` holds the serialized security key.
#[derive(Clone, Debug)]
pub struct AuthenticatorRecord {
    pub credential_id: Vec<u8>,
    pub user_id: Uuid,
    pub public_key: Vec<u8>,
    pub counter: i64,
    pub transports: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created(Uuid),
    Conflict,
}

/// Both variants are success from the caller's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a principal. `email` must already be normalized.
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<CreateUserOutcome>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>>;

    /// Set or clear the TOTP shared secret.
    async fn set_totp_secret(&self, user_id: Uuid, secret: Option<&str>) -> Result<()>;

    /// Overwrite the single pending-challenge slot. `None` clears it.
    async fn set_pending_challenge(&self, user_id: Uuid, challenge: Option<&str>) -> Result<()>;

    /// Administrative purge; cascades to authenticators. Returns `false` when
    /// no such principal exists.
    async fn delete_user(&self, user_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait AuthenticatorStore: Send + Sync {
    /// Store a new authenticator and mark the owner hardware-bound.
    async fn insert_authenticator(&self, record: &AuthenticatorRecord) -> Result<()>;

    async fn list_authenticators(&self, user_id: Uuid) -> Result<Vec<AuthenticatorRecord>>;

    /// Persist the post-ceremony counter and refreshed key material.
    async fn update_authenticator(
        &self,
        credential_id: &[u8],
        counter: i64,
        public_key: &[u8],
    ) -> Result<()>;

    /// Remove every authenticator of a principal and clear `hardware_bound`.
    /// Returns the number of rows removed.
    async fn delete_authenticators(&self, user_id: Uuid) -> Result<u64>;
}

#[async_trait]
pub trait RevocationLedger: Send + Sync {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<RevokeOutcome>;

    async fn is_revoked(&self, token: &str) -> Result<bool>;

    /// Delete entries whose natural expiry is before `now`.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Everything the auth handlers need from persistence.
pub trait Store: UserStore + AuthenticatorStore + RevocationLedger {}

impl<T> Store for T where T: UserStore + AuthenticatorStore + RevocationLedger {}
