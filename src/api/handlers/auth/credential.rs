//! Credential issuer (HS256 JWT).
//!
//! Credentials are self-contained: the server never enumerates them per
//! principal. A random `jti` makes every minted string unique, which keeps the
//! revocation ledger's exact-match lookup sound even for two logins issued in
//! the same second.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SESSION_TTL_SECONDS: i64 = 60 * 60;
const REMEMBERED_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
const PENDING_TTL_SECONDS: i64 = 5 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Session,
    SecondFactor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    Session,
    Remembered,
    Pending,
}

impl Lifetime {
    #[must_use]
    pub fn from_remember(remember: bool) -> Self {
        if remember { Self::Remembered } else { Self::Session }
    }

    #[must_use]
    pub fn ttl_seconds(self) -> i64 {
        match self {
            Self::Session => SESSION_TTL_SECONDS,
            Self::Remembered => REMEMBERED_TTL_SECONDS,
            Self::Pending => PENDING_TTL_SECONDS,
        }
    }

    fn purpose(self) -> Purpose {
        match self {
            Self::Session | Self::Remembered => Purpose::Session,
            Self::Pending => Purpose::SecondFactor,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_age: i64,
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    #[serde(rename = "userId")]
    user_id: Uuid,
    email: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
    purpose: Purpose,
}

// Older credentials carried the subject under `id` and had no `purpose`.
#[derive(Deserialize)]
struct WireClaims {
    #[serde(rename = "userId")]
    user_id: Option<Uuid>,
    id: Option<Uuid>,
    email: String,
    #[serde(default)]
    iat: Option<i64>,
    exp: i64,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    purpose: Option<Purpose>,
}

/// Canonical claims after decoding, whatever the wire shape was.
#[derive(Clone, Debug)]
pub struct CredentialClaims {
    pub user_id: Uuid,
    pub email: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub jti: Option<String>,
    pub purpose: Purpose,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),
    #[error("credential has no subject")]
    MissingSubject,
    #[error("credential timestamp out of range")]
    InvalidTimestamp,
}

impl TryFrom<WireClaims> for CredentialClaims {
    type Error = CredentialError;

    fn try_from(wire: WireClaims) -> Result<Self, Self::Error> {
        let user_id = wire
            .user_id
            .or(wire.id)
            .ok_or(CredentialError::MissingSubject)?;
        let expires_at = timestamp(wire.exp)?;
        let issued_at = wire.iat.map(timestamp).transpose()?;
        Ok(Self {
            user_id,
            email: wire.email,
            issued_at,
            expires_at,
            jti: wire.jti,
            purpose: wire.purpose.unwrap_or(Purpose::Session),
        })
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, CredentialError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(CredentialError::InvalidTimestamp)
}

pub struct CredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl CredentialIssuer {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a credential for `user_id` with the given lifetime class.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue(&self, user_id: Uuid, email: &str, lifetime: Lifetime) -> Result<IssuedCredential> {
        let now = Utc::now();
        let max_age = lifetime.ttl_seconds();
        let expires_at = now + Duration::seconds(max_age);
        let claims = IssuedClaims {
            user_id,
            email,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            purpose: lifetime.purpose(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign credential")?;
        Ok(IssuedCredential {
            token,
            expires_at,
            max_age,
        })
    }

    /// Verify signature and expiry.
    ///
    /// # Errors
    /// Returns an error for a bad signature, an expired credential, or a payload
    /// without a subject.
    pub fn verify(&self, token: &str) -> Result<CredentialClaims, CredentialError> {
        self.decode_with(token, true)
    }

    /// Verify the signature only. Logout uses this so an expired credential can
    /// still be recorded in the ledger with its original expiry.
    ///
    /// # Errors
    /// Returns an error for a bad signature or a payload without a subject.
    pub fn verify_ignoring_expiry(&self, token: &str) -> Result<CredentialClaims, CredentialError> {
        self.decode_with(token, false)
    }

    fn decode_with(&self, token: &str, validate_exp: bool) -> Result<CredentialClaims, CredentialError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        let data = decode::<WireClaims>(token, &self.decoding_key, &validation)?;
        CredentialClaims::try_from(data.claims)
    }
}
