//! Protected profile for the authenticated principal.

use axum::{Json, extract::Extension};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::auth::{AuthError, AuthState, Principal};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
    pub totp_enabled: bool,
    pub hardware_bound: bool,
    pub created_at: DateTime<Utc>,
    pub session_expires_at: DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Current principal", body = MeResponse),
        (status = 401, description = "Missing, revoked or invalid credential", body = super::auth::error::ErrorBody),
        (status = 404, description = "Principal no longer exists", body = super::auth::error::ErrorBody)
    ),
    tag = "me"
)]
pub async fn me(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<MeResponse>, AuthError> {
    let user = auth_state
        .store()
        .find_user(principal.user_id)
        .await?
        .ok_or(AuthError::PrincipalNotFound)?;

    Ok(Json(MeResponse {
        user_id: user.id.to_string(),
        email: user.email,
        is_admin: user.is_admin,
        totp_enabled: user.totp_secret.is_some(),
        hardware_bound: user.hardware_bound,
        created_at: user.created_at,
        session_expires_at: principal.expires_at,
    }))
}
