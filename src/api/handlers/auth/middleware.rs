//! Credential validator.
//!
//! Order matters: the revocation ledger is consulted before the signature, so a
//! revoked credential is reported as revoked even when it has also expired.

use axum::{
    extract::{Extension, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    credential::{CredentialClaims, Purpose},
    delivery::extract_credential,
    error::AuthError,
    principal::Principal,
    state::AuthState,
};

/// Check a credential against the ledger, then signature, expiry and purpose.
///
/// # Errors
/// `SessionRevoked` when the ledger has the credential, `SessionExpiredOrMalformed`
/// for any verification failure, `Internal` when the ledger cannot be read.
pub(crate) async fn check_credential(
    state: &AuthState,
    token: &str,
    purpose: Purpose,
) -> Result<CredentialClaims, AuthError> {
    let revoked = state
        .store()
        .is_revoked(token)
        .await
        .map_err(|err| AuthError::Internal(err.context("revocation ledger lookup failed")))?;
    if revoked {
        debug!("Rejected revoked credential");
        return Err(AuthError::SessionRevoked);
    }

    let claims = state.issuer().verify(token).map_err(|err| {
        debug!("Rejected credential: {err}");
        AuthError::SessionExpiredOrMalformed
    })?;

    if claims.purpose != purpose {
        warn!(
            user_id = %claims.user_id,
            "Credential presented for the wrong purpose: {:?}",
            claims.purpose
        );
        return Err(AuthError::SessionExpiredOrMalformed);
    }

    Ok(claims)
}

/// Attach a [`Principal`] when a valid session credential is present.
///
/// Requests without any credential pass through untouched; the `Principal`
/// extractor downstream rejects them.
pub async fn validate_credential(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(token) = extract_credential(request.headers()) else {
        return Ok(next.run(request).await);
    };

    let claims = check_credential(&state, &token, Purpose::Session).await?;

    request.extensions_mut().insert(Principal {
        user_id: claims.user_id,
        email: claims.email,
        credential: token,
        expires_at: claims.expires_at,
    });

    Ok(next.run(request).await)
}
