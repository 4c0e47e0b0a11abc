use crate::{
    api::{self, AuthConfig, AuthState, Environment},
    store::{MemoryStore, PgStore, Store},
};
use anyhow::{Context, Result};
use chrono::Utc;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub environment: Environment,
    pub signing_secret: Option<SecretString>,
    pub frontend_base_url: String,
    pub expected_host: Option<String>,
    pub admin_email: Option<String>,
    pub webauthn_rp_id: Option<String>,
    pub webauthn_rp_origin: Option<String>,
    pub totp_issuer: String,
    pub enforce_authenticator_counter: bool,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(self.frontend_base_url.clone())
            .with_environment(self.environment)
            .with_totp_issuer(self.totp_issuer.clone())
            .with_enforce_authenticator_counter(self.enforce_authenticator_counter);

        if let Some(secret) = &self.signing_secret {
            config = config.with_signing_secret(secret.clone());
        }
        if let Some(rp_id) = &self.webauthn_rp_id {
            config = config.with_webauthn_rp_id(rp_id.clone());
        }
        if let Some(rp_origin) = &self.webauthn_rp_origin {
            config = config.with_webauthn_rp_origin(rp_origin.clone());
        }
        if let Some(host) = &self.expected_host {
            config = config.with_expected_host(host.clone());
        }
        if let Some(email) = &self.admin_email {
            config = config.with_admin_email(email.clone());
        }
        config
    }
}

/// Connect to Postgres and apply the schema.
///
/// # Errors
/// Returns an error if the connection or the schema statements fail.
pub(super) async fn connect(dsn: &str) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store.apply_schema().await?;
    Ok(store)
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store, the auth state or the listener cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    let store: Arc<dyn Store> = match &args.dsn {
        Some(dsn) => Arc::new(connect(dsn).await?),
        None => {
            warn!("No --dsn given: using the in-memory store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let pruned = store
        .prune_expired(Utc::now())
        .await
        .context("Failed to prune the revocation ledger")?;
    info!(pruned, "Revocation ledger pruned");

    let auth_config = args.auth_config();
    info!(
        environment = %auth_config.environment(),
        rp_id = auth_config.webauthn_rp_id(),
        expected_host = auth_config.expected_host(),
        "Auth configured"
    );

    let auth_state = Arc::new(AuthState::new(auth_config, store)?);

    api::new(args.port, auth_state).await
}
