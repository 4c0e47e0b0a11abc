//! Session introspection and logout.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    delivery::{clear_session_cookie, extract_credential},
    principal::Principal,
    state::AuthState,
    types::{LogoutResponse, SessionResponse},
};
use crate::store::RevokeOutcome;

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 401, description = "No valid session", body = super::error::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn session(principal: Principal) -> impl IntoResponse {
    Json(SessionResponse {
        user_id: principal.user_id.to_string(),
        email: principal.email,
        expires_at: principal.expires_at,
    })
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Credential revoked and cookie cleared", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let status = match extract_credential(&headers) {
        None => "no_session",
        Some(token) => revoke(&auth_state, &token).await,
    };

    // Always clear the cookie, even when nothing was revoked.
    let mut response_headers = HeaderMap::new();
    match clear_session_cookie(auth_state.config()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build clearing cookie: {err}"),
    }

    (
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse {
            status: status.to_string(),
        }),
    )
}

async fn revoke(state: &AuthState, token: &str) -> &'static str {
    // Expired credentials are still recorded so the ledger reflects the logout.
    let claims = match state.issuer().verify_ignoring_expiry(token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!("Logout with unverifiable credential: {err}");
            return "no_session";
        }
    };

    match state.store().revoke(token, claims.expires_at).await {
        Ok(RevokeOutcome::Revoked) => {
            info!(user_id = %claims.user_id, "Credential revoked");
            "revoked"
        }
        Ok(RevokeOutcome::AlreadyRevoked) => "already_revoked",
        Err(err) => {
            // The credential stays valid until its natural expiry.
            error!(user_id = %claims.user_id, "Failed to record revocation: {err:#}");
            "not_recorded"
        }
    }
}
