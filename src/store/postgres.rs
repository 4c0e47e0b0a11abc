//! Postgres-backed store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{
    AuthenticatorRecord, AuthenticatorStore, CreateUserOutcome, RevocationLedger, RevokeOutcome,
    UserRecord, UserStore,
};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str = "id, email, password_hash, is_admin, totp_secret, pending_challenge, hardware_bound, created_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply `sql/schema.sql`. Every statement is `IF NOT EXISTS`.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        totp_secret: row.try_get("totp_secret")?,
        pending_challenge: row.try_get("pending_challenge")?,
        hardware_bound: row.try_get("hardware_bound")?,
        created_at: row.try_get("created_at")?,
    })
}

fn authenticator_from_row(row: &PgRow) -> Result<AuthenticatorRecord, sqlx::Error> {
    Ok(AuthenticatorRecord {
        credential_id: row.try_get("credential_id")?,
        user_id: row.try_get("user_id")?,
        public_key: row.try_get("public_key")?,
        counter: row.try_get("counter")?,
        transports: row.try_get("transports")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO users (id, email, password_hash, is_admin)
            VALUES ($1, $2, $3, $4)
        ";
        let user_id = Uuid::new_v4();
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(email)
            .bind(password_hash)
            .bind(is_admin)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(CreateUserOutcome::Created(user_id)),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "SELECT .. FROM users WHERE email = $1"))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("failed to decode user row")
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "SELECT .. FROM users WHERE id = $1"))
            .await
            .context("failed to lookup user")?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("failed to decode user row")
    }

    async fn set_totp_secret(&self, user_id: Uuid, secret: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET totp_secret = $1 WHERE id = $2";
        sqlx::query(query)
            .bind(secret)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update TOTP secret")?;
        Ok(())
    }

    async fn set_pending_challenge(&self, user_id: Uuid, challenge: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET pending_challenge = $1 WHERE id = $2";
        sqlx::query(query)
            .bind(challenge)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update pending challenge")?;
        Ok(())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuthenticatorStore for PgStore {
    async fn insert_authenticator(&self, record: &AuthenticatorRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin authenticator insert")?;

        let query = r"
            INSERT INTO authenticators (credential_id, user_id, public_key, counter, transports)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(&record.credential_id)
            .bind(record.user_id)
            .bind(&record.public_key)
            .bind(record.counter)
            .bind(record.transports.as_deref())
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert authenticator")?;

        let query = "UPDATE users SET hardware_bound = TRUE WHERE id = $1";
        sqlx::query(query)
            .bind(record.user_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to mark user hardware bound")?;

        tx.commit().await.context("commit authenticator insert")?;
        Ok(())
    }

    async fn list_authenticators(&self, user_id: Uuid) -> Result<Vec<AuthenticatorRecord>> {
        let query = r"
            SELECT credential_id, user_id, public_key, counter, transports, created_at
            FROM authenticators
            WHERE user_id = $1
            ORDER BY created_at
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list authenticators")?;
        rows.iter()
            .map(authenticator_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to decode authenticator row")
    }

    async fn update_authenticator(
        &self,
        credential_id: &[u8],
        counter: i64,
        public_key: &[u8],
    ) -> Result<()> {
        let query = "UPDATE authenticators SET counter = $1, public_key = $2 WHERE credential_id = $3";
        sqlx::query(query)
            .bind(counter)
            .bind(public_key)
            .bind(credential_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update authenticator counter")?;
        Ok(())
    }

    async fn delete_authenticators(&self, user_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("begin authenticator delete")?;

        let query = "DELETE FROM authenticators WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete authenticators")?;

        let query = "UPDATE users SET hardware_bound = FALSE, pending_challenge = NULL WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to clear hardware bound flag")?;

        tx.commit().await.context("commit authenticator delete")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevocationLedger for PgStore {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<RevokeOutcome> {
        let query = "INSERT INTO revoked_tokens (token, expires_at) VALUES ($1, $2)";
        let result = sqlx::query(query)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(RevokeOutcome::Revoked),
            Err(err) if is_unique_violation(&err) => Ok(RevokeOutcome::AlreadyRevoked),
            Err(err) => Err(err).context("failed to insert revoked token"),
        }
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        let query = "SELECT 1 FROM revoked_tokens WHERE token = $1";
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check revoked token")?;
        Ok(row.is_some())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM revoked_tokens WHERE expires_at < $1";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to prune revoked tokens")?;
        Ok(result.rows_affected())
    }
}
