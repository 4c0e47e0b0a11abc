//! Auth state and configuration.

use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use super::credential::CredentialIssuer;
use crate::{store::Store, totp::TotpService, webauthn::SecurityKeyService};

const DEFAULT_TOTP_ISSUER: &str = "Phishlab";
const MIN_PRODUCTION_SECRET_LEN: usize = 32;
// Development only; refused in production.
const DEVELOPMENT_SIGNING_SECRET: &str = "phishlab-development-signing-secret-do-not-deploy";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    signing_secret: Option<SecretString>,
    frontend_base_url: String,
    webauthn_rp_id: String,
    webauthn_rp_origin: String,
    expected_host: String,
    totp_issuer: String,
    enforce_authenticator_counter: bool,
    admin_email: Option<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        let parsed = Url::parse(&frontend_base_url).ok();
        let rp_id = parsed
            .as_ref()
            .and_then(|u| u.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let expected_host = parsed
            .as_ref()
            .and_then(|u| {
                u.host_str().map(|host| match u.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                })
            })
            .unwrap_or_else(|| rp_id.clone());

        // Origins never carry a trailing slash.
        let rp_origin = frontend_base_url.trim_end_matches('/').to_string();

        Self {
            environment: Environment::default(),
            signing_secret: None,
            frontend_base_url,
            webauthn_rp_id: rp_id,
            webauthn_rp_origin: rp_origin,
            expected_host,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            enforce_authenticator_counter: false,
            admin_email: None,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_signing_secret(mut self, secret: SecretString) -> Self {
        self.signing_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_id(mut self, rp_id: String) -> Self {
        self.webauthn_rp_id = rp_id;
        self
    }

    #[must_use]
    pub fn with_webauthn_rp_origin(mut self, rp_origin: String) -> Self {
        self.webauthn_rp_origin = rp_origin.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_expected_host(mut self, host: String) -> Self {
        self.expected_host = host;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_enforce_authenticator_counter(mut self, enforce: bool) -> Self {
        self.enforce_authenticator_counter = enforce;
        self
    }

    #[must_use]
    pub fn with_admin_email(mut self, email: String) -> Self {
        self.admin_email = Some(email.trim().to_lowercase());
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn webauthn_rp_id(&self) -> &str {
        &self.webauthn_rp_id
    }

    #[must_use]
    pub fn webauthn_rp_origin(&self) -> &str {
        &self.webauthn_rp_origin
    }

    #[must_use]
    pub fn expected_host(&self) -> &str {
        &self.expected_host
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn enforce_authenticator_counter(&self) -> bool {
        self.enforce_authenticator_counter
    }

    pub(super) fn is_admin_email(&self, email_normalized: &str) -> bool {
        self.admin_email.as_deref() == Some(email_normalized)
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.environment == Environment::Production
    }

    pub(super) fn session_cookie_same_site(&self) -> &'static str {
        match self.environment {
            Environment::Production => "Strict",
            Environment::Development => "Lax",
        }
    }

    /// Resolve the signing secret for this environment.
    ///
    /// # Errors
    /// Returns an error in production when no secret (or a short one) is configured.
    fn resolve_signing_secret(&self) -> Result<SecretString> {
        match (&self.signing_secret, self.environment) {
            (Some(secret), Environment::Production)
                if secret.expose_secret().len() < MIN_PRODUCTION_SECRET_LEN =>
            {
                Err(anyhow!(
                    "signing secret must be at least {MIN_PRODUCTION_SECRET_LEN} bytes in production"
                ))
            }
            (Some(secret), _) => Ok(secret.clone()),
            (None, Environment::Production) => {
                Err(anyhow!("signing secret is required in production"))
            }
            (None, Environment::Development) => {
                warn!("No signing secret configured; using the built-in development secret");
                Ok(SecretString::from(DEVELOPMENT_SIGNING_SECRET.to_string()))
            }
        }
    }
}

/// Shared, read-only state for every auth handler.
pub struct AuthState {
    config: AuthConfig,
    issuer: CredentialIssuer,
    store: Arc<dyn Store>,
    totp: TotpService,
    security_keys: SecurityKeyService,
}

impl AuthState {
    /// Build the auth state.
    ///
    /// # Errors
    /// Returns an error if the signing secret cannot be resolved or the `WebAuthn`
    /// relying party configuration is invalid.
    pub fn new(config: AuthConfig, store: Arc<dyn Store>) -> Result<Self> {
        let secret = config.resolve_signing_secret()?;
        let issuer = CredentialIssuer::new(secret.expose_secret().as_bytes());
        let totp = TotpService::new(config.totp_issuer().to_string());
        let security_keys =
            SecurityKeyService::new(config.webauthn_rp_id(), config.webauthn_rp_origin())
                .context("Invalid WebAuthn relying party configuration")?;

        Ok(Self {
            config,
            issuer,
            store,
            totp,
            security_keys,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn totp(&self) -> &TotpService {
        &self.totp
    }

    pub(crate) fn security_keys(&self) -> &SecurityKeyService {
        &self.security_keys
    }
}
