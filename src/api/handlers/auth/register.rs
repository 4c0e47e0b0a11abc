//! Principal registration.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    error::AuthError,
    password::{MIN_PASSWORD_LENGTH, hash_password},
    state::AuthState,
    types::{RegisterRequest, RegisterResponse},
    utils::{normalize_email, valid_email},
};
use crate::store::CreateUserOutcome;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Principal created", body = RegisterResponse),
        (status = 400, description = "Invalid email or password", body = super::error::ErrorBody),
        (status = 409, description = "Email already registered", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::InvalidRequest("invalid email".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidRequest(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let password_hash = hash_password(request.password).await?;
    let is_admin = auth_state.config().is_admin_email(&email);

    match auth_state
        .store()
        .create_user(&email, &password_hash, is_admin)
        .await?
    {
        CreateUserOutcome::Created(user_id) => {
            info!(%user_id, is_admin, "Principal registered");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    user_id: user_id.to_string(),
                    email,
                }),
            ))
        }
        CreateUserOutcome::Conflict => {
            debug!("Registration rejected: email already taken");
            Err(AuthError::EmailTaken)
        }
    }
}
