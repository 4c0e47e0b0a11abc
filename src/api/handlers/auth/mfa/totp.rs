//! TOTP enrollment and step-up.

use axum::{Json, extract::Extension, response::Response};
use std::sync::Arc;
use tracing::{info, warn};

use super::{complete_second_factor, resolve_pending};
use crate::api::handlers::auth::{
    error::AuthError,
    principal::Principal,
    state::AuthState,
    types::{TotpEnableRequest, TotpSetupResponse, TotpStatusResponse, TotpVerifyRequest},
};
use crate::store::UserRecord;

async fn load_user(state: &AuthState, principal: &Principal) -> Result<UserRecord, AuthError> {
    state
        .store()
        .find_user(principal.user_id)
        .await?
        .ok_or(AuthError::PrincipalNotFound)
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/verify",
    request_body = TotpVerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted; session granted", body = crate::api::handlers::auth::types::SessionGranted),
        (status = 400, description = "Invalid code", body = crate::api::handlers::auth::error::ErrorBody),
        (status = 401, description = "Pending credential invalid or already used", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn verify(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<TotpVerifyRequest>,
) -> Result<Response, AuthError> {
    let claims = resolve_pending(&auth_state, &request.pending_token).await?;
    let user = auth_state
        .store()
        .find_user(claims.user_id)
        .await?
        .ok_or(AuthError::PrincipalNotFound)?;

    if user.hardware_bound {
        return Err(AuthError::InvalidRequest(
            "security key required for this account".to_string(),
        ));
    }
    let Some(secret) = user.totp_secret.as_deref() else {
        return Err(AuthError::InvalidRequest("TOTP is not enabled".to_string()));
    };

    if !auth_state.totp().verify(secret, &request.code)? {
        // No lockout: repeated guesses are only bounded by the pending lifetime.
        warn!(user_id = %user.id, "Invalid TOTP code");
        return Err(AuthError::SecondFactorInvalid);
    }

    complete_second_factor(
        &auth_state,
        &request.pending_token,
        &claims,
        request.remember,
        request.delivery,
    )
    .await
}

#[utoipa::path(
    post,
    path = "/v1/me/totp/setup",
    responses(
        (status = 200, description = "New secret; not stored until enabled", body = TotpSetupResponse),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn setup(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<TotpSetupResponse>, AuthError> {
    let enrollment = auth_state.totp().enroll(&principal.email)?;
    Ok(Json(TotpSetupResponse {
        secret: enrollment.secret,
        otpauth_url: enrollment.otpauth_url,
        qr_code: enrollment.qr_code,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/me/totp/enable",
    request_body = TotpEnableRequest,
    responses(
        (status = 200, description = "TOTP enabled", body = TotpStatusResponse),
        (status = 400, description = "Invalid secret or code", body = crate::api::handlers::auth::error::ErrorBody),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn enable(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<TotpEnableRequest>,
) -> Result<Json<TotpStatusResponse>, AuthError> {
    let user = load_user(&auth_state, &principal).await?;
    let secret = request.secret.trim().to_uppercase();

    let valid = auth_state
        .totp()
        .verify(&secret, &request.code)
        .map_err(|_| AuthError::InvalidRequest("invalid TOTP secret".to_string()))?;
    if !valid {
        return Err(AuthError::SecondFactorInvalid);
    }

    auth_state
        .store()
        .set_totp_secret(user.id, Some(&secret))
        .await?;
    info!(user_id = %user.id, "TOTP enabled");
    Ok(Json(TotpStatusResponse { enabled: true }))
}

#[utoipa::path(
    post,
    path = "/v1/me/totp/disable",
    responses(
        (status = 200, description = "TOTP disabled", body = TotpStatusResponse),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn disable(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<TotpStatusResponse>, AuthError> {
    let user = load_user(&auth_state, &principal).await?;
    auth_state.store().set_totp_secret(user.id, None).await?;
    info!(user_id = %user.id, "TOTP disabled");
    Ok(Json(TotpStatusResponse { enabled: false }))
}
