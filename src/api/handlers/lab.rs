//! Lab-only defenses that sit in front of the ordinary login.
//!
//! Header-based proxy detection is easy to evade (a careful relay strips the
//! headers); the lab exposes it to show exactly that.

use axum::{
    Json,
    extract::Extension,
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use super::auth::{
    AuthError, AuthState, login::authenticate, types::LoginRequest, utils::proxy_signals,
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DomainResponse {
    /// Origin a page must be served from; compared client-side.
    pub expected_origin: String,
    pub expected_host: String,
    pub rp_id: String,
}

#[utoipa::path(
    post,
    path = "/v1/lab/guarded/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login result, as for /v1/auth/login", body = super::auth::types::SessionGranted),
        (status = 401, description = "Invalid email or password", body = super::auth::error::ErrorBody),
        (status = 403, description = "Proxy indicators present", body = super::auth::error::ErrorBody)
    ),
    tag = "lab"
)]
pub async fn guarded_login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let signals = proxy_signals(&headers, auth_state.config().expected_host());
    if !signals.is_empty() {
        warn!(signals = ?signals, "Guarded login refused: proxy indicators present");
        return Err(AuthError::ProxyDetected(signals));
    }
    authenticate(&auth_state, request).await
}

#[utoipa::path(
    get,
    path = "/v1/lab/domain",
    responses(
        (status = 200, description = "Expected origin for client-side domain verification", body = DomainResponse)
    ),
    tag = "lab"
)]
pub async fn domain(auth_state: Extension<Arc<AuthState>>) -> Json<DomainResponse> {
    let config = auth_state.config();
    Json(DomainResponse {
        expected_origin: config.webauthn_rp_origin().to_string(),
        expected_host: config.expected_host().to_string(),
        rp_id: config.webauthn_rp_id().to_string(),
    })
}
