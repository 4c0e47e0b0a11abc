//! Primary-factor login.
//!
//! Unknown emails and wrong passwords produce the same error so the endpoint
//! does not reveal which accounts exist. Both paths also pay for one argon2
//! verification, so the response time does not reveal it either.

use axum::{Json, extract::Extension, response::Response};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    error::AuthError,
    mfa::{SecondFactor, complete_login, require_second_factor},
    password::{verify_dummy, verify_password},
    state::AuthState,
    types::LoginRequest,
    utils::normalize_email,
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session granted, or `mfa_required`/`fido_required` with a pending token", body = super::types::SessionGranted),
        (status = 401, description = "Invalid email or password", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    authenticate(&auth_state, request).await
}

/// Run the primary factor and move to the next state of the login machine.
pub(crate) async fn authenticate(
    state: &AuthState,
    request: LoginRequest,
) -> Result<Response, AuthError> {
    let email = normalize_email(&request.email);
    let Some(user) = state.store().find_user_by_email(&email).await? else {
        if let Err(err) = verify_dummy(request.password).await {
            warn!("Dummy password verification failed: {err:#}");
        }
        debug!("Login rejected: unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    if !verify_password(request.password, user.password_hash.clone()).await? {
        debug!(user_id = %user.id, "Login rejected: wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    match SecondFactor::required_for(&user) {
        Some(factor) => require_second_factor(state, &user, factor),
        None => complete_login(state, user.id, &user.email, request.remember, request.delivery),
    }
}
