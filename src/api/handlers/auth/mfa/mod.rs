//! Second-factor state machine.
//!
//! `PrimaryVerified -> SecondFactorPending(factor) -> FullyAuthenticated`.
//!
//! A principal with a registered security key is always asked for it, even if
//! TOTP is enabled too. The pending state is carried by a short-lived
//! credential with `purpose = second_factor`; the validator never accepts it for
//! protected routes, and a successful step-up revokes it so it cannot be
//! replayed.

pub(crate) mod totp;
pub(crate) mod webauthn;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use super::{
    credential::{CredentialClaims, Lifetime, Purpose},
    delivery::{Delivery, deliver},
    error::AuthError,
    middleware::check_credential,
    state::AuthState,
    types::SecondFactorRequired,
};
use crate::store::{RevokeOutcome, UserRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SecondFactor {
    Totp,
    Hardware,
}

impl SecondFactor {
    /// Which factor a principal must present, if any.
    pub(crate) fn required_for(user: &UserRecord) -> Option<Self> {
        if user.hardware_bound {
            Some(Self::Hardware)
        } else if user.totp_secret.is_some() {
            Some(Self::Totp)
        } else {
            None
        }
    }

    fn status(self) -> &'static str {
        match self {
            Self::Totp => "mfa_required",
            Self::Hardware => "fido_required",
        }
    }
}

/// Answer a primary-factor success with a pending credential.
pub(crate) fn require_second_factor(
    state: &AuthState,
    user: &UserRecord,
    factor: SecondFactor,
) -> Result<Response, AuthError> {
    let issued = state
        .issuer()
        .issue(user.id, &user.email, Lifetime::Pending)?;
    info!(user_id = %user.id, factor = ?factor, "Second factor required");
    let body = SecondFactorRequired {
        status: factor.status().to_string(),
        pending_token: issued.token,
        expires_at: issued.expires_at,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Validate a pending credential presented to a step-up endpoint.
pub(crate) async fn resolve_pending(
    state: &AuthState,
    pending_token: &str,
) -> Result<CredentialClaims, AuthError> {
    check_credential(state, pending_token.trim(), Purpose::SecondFactor).await
}

/// Revoke the pending credential, then mint and deliver the real session.
///
/// The session is only issued once the pending credential is in the ledger, and
/// only by the request whose write put it there. Concurrent step-ups racing on
/// one pending credential all pass validation, but the ledger lets one win.
pub(crate) async fn complete_second_factor(
    state: &AuthState,
    pending_token: &str,
    claims: &CredentialClaims,
    remember: bool,
    delivery: Delivery,
) -> Result<Response, AuthError> {
    let outcome = state
        .store()
        .revoke(pending_token.trim(), claims.expires_at)
        .await
        .map_err(|err| AuthError::Internal(err.context("failed to consume pending credential")))?;
    if outcome == RevokeOutcome::AlreadyRevoked {
        warn!(user_id = %claims.user_id, "Pending credential already consumed");
        return Err(AuthError::SessionRevoked);
    }
    complete_login(state, claims.user_id, &claims.email, remember, delivery)
}

/// Mint a session credential and hand it to the chosen delivery.
pub(crate) fn complete_login(
    state: &AuthState,
    user_id: uuid::Uuid,
    email: &str,
    remember: bool,
    delivery: Delivery,
) -> Result<Response, AuthError> {
    let issued = state
        .issuer()
        .issue(user_id, email, Lifetime::from_remember(remember))?;
    info!(%user_id, remember, delivery = ?delivery, "Session issued");
    Ok(deliver(state.config(), delivery, &issued, user_id, email))
}
