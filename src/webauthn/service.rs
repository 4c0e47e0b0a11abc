//! Security key ceremonies.
//!
//! The service is store-agnostic: callers pass in the principal's authenticator
//! rows and the contents of its single pending-challenge slot, and persist
//! whatever comes back. Ceremony state travels through the slot as JSON, tagged
//! so a registration challenge can never complete an authentication.
//!
//! Keys are persisted with their embedded signature counter zeroed. The
//! authenticator row's `counter` column is the only counter consulted, so the
//! enforcement policy stays with [`apply_counter_policy`] rather than the
//! library's built-in check.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    AuthenticationResult, CreationChallengeResponse, CredentialID, PublicKeyCredential,
    RegisterPublicKeyCredential, RequestChallengeResponse, SecurityKey,
    SecurityKeyAuthentication, SecurityKeyRegistration, Webauthn, WebauthnBuilder, WebauthnError,
};

use crate::store::AuthenticatorRecord;

#[derive(Debug, thiserror::Error)]
pub enum SecurityKeyError {
    #[error("no security key ceremony in progress")]
    NoPendingCeremony,
    #[error("pending ceremony is of a different kind")]
    WrongCeremony,
    #[error("no security keys registered")]
    NoAuthenticators,
    #[error("assertion was made with an unknown credential")]
    UnknownCredential,
    #[error("authenticator counter regressed (stored {stored}, presented {presented})")]
    CounterRegressed { stored: i64, presented: u32 },
    #[error("webauthn: {0}")]
    Ceremony(#[from] WebauthnError),
    #[error("ceremony state: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
enum PendingCeremony {
    Registration(SecurityKeyRegistration),
    Authentication(SecurityKeyAuthentication),
}

/// New counter and key material to persist after a successful assertion.
#[derive(Clone, Debug)]
pub struct AuthenticatorUpdate {
    pub credential_id: Vec<u8>,
    pub counter: i64,
    pub public_key: Vec<u8>,
}

/// `true` when `presented` does not advance past `stored`. Authenticators that
/// never implement a counter report zero forever, which is accepted.
#[must_use]
pub fn counter_regressed(stored: i64, presented: u32) -> bool {
    let presented = i64::from(presented);
    if stored == 0 && presented == 0 {
        return false;
    }
    presented <= stored
}

pub struct SecurityKeyService {
    webauthn: Webauthn,
}

impl SecurityKeyService {
    /// Create a new security key service.
    ///
    /// # Errors
    /// Returns error if the origin is not a URL or the `WebAuthn` builder rejects
    /// the relying party.
    pub fn new(rp_id: &str, rp_origin: &str) -> anyhow::Result<Self> {
        let rp_origin_url = Url::parse(rp_origin)?;
        let webauthn = WebauthnBuilder::new(rp_id, &rp_origin_url)?
            .rp_name("Phishlab")
            .build()?;
        Ok(Self { webauthn })
    }

    /// Begin registering a new key. Returns the browser options and the state
    /// to place in the pending slot.
    ///
    /// # Errors
    /// Returns error if challenge generation or state serialization fails.
    pub fn start_registration(
        &self,
        user_id: Uuid,
        email: &str,
        existing: &[AuthenticatorRecord],
    ) -> Result<(CreationChallengeResponse, String), SecurityKeyError> {
        // Prevent registering the same key twice.
        let exclude_credentials: Vec<CredentialID> = existing
            .iter()
            .map(|record| record.credential_id.clone().into())
            .collect();

        let (challenge, registration) = self.webauthn.start_securitykey_registration(
            user_id,
            email,
            email,
            Some(exclude_credentials),
            None,
            None,
        )?;

        let state = serde_json::to_string(&PendingCeremony::Registration(registration))?;
        Ok((challenge, state))
    }

    /// Finish a registration against the state taken from the pending slot.
    ///
    /// # Errors
    /// Returns error if no registration is pending or the attestation is invalid.
    pub fn finish_registration(
        &self,
        pending: Option<&str>,
        response: &RegisterPublicKeyCredential,
        user_id: Uuid,
    ) -> Result<AuthenticatorRecord, SecurityKeyError> {
        let registration = registration_state(pending)?;
        let key = self
            .webauthn
            .finish_securitykey_registration(response, &registration)?;

        let transports = response
            .response
            .transports
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(AuthenticatorRecord {
            credential_id: key.cred_id().as_slice().to_vec(),
            user_id,
            public_key: encode_key(&key)?,
            counter: 0,
            transports,
            created_at: Utc::now(),
        })
    }

    /// Begin an assertion against every registered key.
    ///
    /// # Errors
    /// Returns error if no usable key is registered or challenge generation fails.
    pub fn start_authentication(
        &self,
        records: &[AuthenticatorRecord],
    ) -> Result<(RequestChallengeResponse, String), SecurityKeyError> {
        let keys = decode_keys(records);
        if keys.is_empty() {
            return Err(SecurityKeyError::NoAuthenticators);
        }

        let (challenge, authentication) = self.webauthn.start_securitykey_authentication(&keys)?;

        let state = serde_json::to_string(&PendingCeremony::Authentication(authentication))?;
        Ok((challenge, state))
    }

    /// Finish an assertion and apply the counter policy.
    ///
    /// With `enforce_counter` a non-advancing counter fails the ceremony;
    /// otherwise it is logged and accepted.
    ///
    /// # Errors
    /// Returns error if no authentication is pending, the signature is invalid,
    /// the credential is unknown, or the counter regressed under enforcement.
    pub fn finish_authentication(
        &self,
        pending: Option<&str>,
        response: &PublicKeyCredential,
        records: &[AuthenticatorRecord],
        enforce_counter: bool,
    ) -> Result<AuthenticatorUpdate, SecurityKeyError> {
        let authentication = authentication_state(pending)?;
        let result = self
            .webauthn
            .finish_securitykey_authentication(response, &authentication)?;

        let record = records
            .iter()
            .find(|record| record.credential_id.as_slice() == result.cred_id().as_slice())
            .ok_or(SecurityKeyError::UnknownCredential)?;

        let counter = apply_counter_policy(record.counter, result.counter(), enforce_counter)?;
        let public_key = refreshed_key(record, &result)?;

        Ok(AuthenticatorUpdate {
            credential_id: record.credential_id.clone(),
            counter,
            public_key,
        })
    }
}

fn registration_state(pending: Option<&str>) -> Result<SecurityKeyRegistration, SecurityKeyError> {
    let pending = pending.ok_or(SecurityKeyError::NoPendingCeremony)?;
    match serde_json::from_str(pending)? {
        PendingCeremony::Registration(state) => Ok(state),
        PendingCeremony::Authentication(_) => Err(SecurityKeyError::WrongCeremony),
    }
}

fn authentication_state(
    pending: Option<&str>,
) -> Result<SecurityKeyAuthentication, SecurityKeyError> {
    let pending = pending.ok_or(SecurityKeyError::NoPendingCeremony)?;
    match serde_json::from_str(pending)? {
        PendingCeremony::Authentication(state) => Ok(state),
        PendingCeremony::Registration(_) => Err(SecurityKeyError::WrongCeremony),
    }
}

/// Serialize a key with its embedded counter reset.
fn encode_key(key: &SecurityKey) -> Result<Vec<u8>, SecurityKeyError> {
    let mut value = serde_json::to_value(key)?;
    reset_counter(&mut value);
    Ok(serde_json::to_vec(&value)?)
}

fn decode_key(bytes: &[u8]) -> Result<SecurityKey, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_slice(bytes)?;
    reset_counter(&mut value);
    serde_json::from_value(value)
}

// Rows written before counters were split out may still carry one.
fn reset_counter(value: &mut serde_json::Value) {
    if let Some(counter) = value.pointer_mut("/cred/counter") {
        *counter = serde_json::Value::from(0_u32);
    }
}

fn decode_keys(records: &[AuthenticatorRecord]) -> Vec<SecurityKey> {
    records
        .iter()
        .filter_map(|record| match decode_key(&record.public_key) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(user_id = %record.user_id, "Skipping undecodable security key: {err}");
                None
            }
        })
        .collect()
}

fn apply_counter_policy(stored: i64, presented: u32, enforce: bool) -> Result<i64, SecurityKeyError> {
    if counter_regressed(stored, presented) {
        if enforce {
            return Err(SecurityKeyError::CounterRegressed { stored, presented });
        }
        warn!(
            stored,
            presented, "Authenticator counter did not advance; accepting (counter not enforced)"
        );
        // Never move the stored counter backwards.
        return Ok(stored.max(i64::from(presented)));
    }
    Ok(i64::from(presented))
}

fn refreshed_key(
    record: &AuthenticatorRecord,
    result: &AuthenticationResult,
) -> Result<Vec<u8>, SecurityKeyError> {
    let mut key = decode_key(&record.public_key)?;
    key.update_credential(result);
    encode_key(&key)
}
