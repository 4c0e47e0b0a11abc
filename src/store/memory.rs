//! In-process store used when no DSN is configured and by the test suite.
//!
//! State lives behind a single `tokio::sync::Mutex`; each trait call takes the
//! lock once, which gives the same single-row atomicity Postgres provides.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuthenticatorRecord, AuthenticatorStore, CreateUserOutcome, RevocationLedger, RevokeOutcome,
    UserRecord, UserStore,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    authenticators: HashMap<Vec<u8>, AuthenticatorRecord>,
    revoked: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows; used by tests to check idempotent revocation.
    pub async fn revoked_count(&self) -> usize {
        self.tables.lock().await.revoked.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<CreateUserOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|user| user.email == email) {
            return Ok(CreateUserOutcome::Conflict);
        }
        let id = Uuid::new_v4();
        tables.users.insert(
            id,
            UserRecord {
                id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                is_admin,
                totp_secret: None,
                pending_challenge: None,
                hardware_bound: false,
                created_at: Utc::now(),
            },
        );
        Ok(CreateUserOutcome::Created(id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn set_totp_secret(&self, user_id: Uuid, secret: Option<&str>) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.totp_secret = secret.map(str::to_string);
        }
        Ok(())
    }

    async fn set_pending_challenge(&self, user_id: Uuid, challenge: Option<&str>) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.pending_challenge = challenge.map(str::to_string);
        }
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let removed = tables.users.remove(&user_id).is_some();
        if removed {
            tables
                .authenticators
                .retain(|_, record| record.user_id != user_id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl AuthenticatorStore for MemoryStore {
    async fn insert_authenticator(&self, record: &AuthenticatorRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.authenticators.contains_key(&record.credential_id) {
            anyhow::bail!("authenticator already registered");
        }
        let Some(user) = tables.users.get_mut(&record.user_id) else {
            anyhow::bail!("authenticator owner not found");
        };
        user.hardware_bound = true;
        tables
            .authenticators
            .insert(record.credential_id.clone(), record.clone());
        Ok(())
    }

    async fn list_authenticators(&self, user_id: Uuid) -> Result<Vec<AuthenticatorRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<AuthenticatorRecord> = tables
            .authenticators
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn update_authenticator(
        &self,
        credential_id: &[u8],
        counter: i64,
        public_key: &[u8],
    ) -> Result<()> {
        if let Some(record) = self.tables.lock().await.authenticators.get_mut(credential_id) {
            record.counter = counter;
            record.public_key = public_key.to_vec();
        }
        Ok(())
    }

    async fn delete_authenticators(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.authenticators.len();
        tables
            .authenticators
            .retain(|_, record| record.user_id != user_id);
        let removed = before - tables.authenticators.len();
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.hardware_bound = false;
            user.pending_challenge = None;
        }
        Ok(removed as u64)
    }
}

#[async_trait]
impl RevocationLedger for MemoryStore {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<RevokeOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.revoked.contains_key(token) {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }
        tables.revoked.insert(token.to_string(), expires_at);
        Ok(RevokeOutcome::Revoked)
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        Ok(self.tables.lock().await.revoked.contains_key(token))
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.revoked.len();
        tables.revoked.retain(|_, expires_at| *expires_at >= now);
        Ok((before - tables.revoked.len()) as u64)
    }
}
