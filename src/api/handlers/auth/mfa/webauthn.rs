//! Security key registration and step-up.
//!
//! Each principal has one pending-challenge slot. Issuing options overwrites it
//! (last writer wins) and every verify attempt empties it before checking the
//! response, so a challenge can be answered at most once.

use axum::{Json, extract::Extension, response::Response};
use base64ct::{Base64UrlUnpadded, Encoding};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{complete_second_factor, resolve_pending};
use crate::api::handlers::auth::{
    error::AuthError,
    principal::Principal,
    state::AuthState,
    types::{
        AssertionVerifyRequest, AuthenticatorSummary, CreationOptionsResponse,
        HardwareStatusResponse, PendingTokenRequest, RegisterVerifyRequest, RequestOptionsResponse,
    },
};
use crate::store::UserRecord;

async fn load_user(state: &AuthState, user_id: Uuid) -> Result<UserRecord, AuthError> {
    state
        .store()
        .find_user(user_id)
        .await?
        .ok_or(AuthError::PrincipalNotFound)
}

/// Empty the slot and hand back what it held.
async fn take_pending_challenge(
    state: &AuthState,
    user: &UserRecord,
) -> Result<Option<String>, AuthError> {
    state.store().set_pending_challenge(user.id, None).await?;
    Ok(user.pending_challenge.clone())
}

#[utoipa::path(
    post,
    path = "/v1/me/webauthn/register/options",
    responses(
        (status = 200, description = "Creation options for navigator.credentials.create", body = CreationOptionsResponse),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn register_options(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<CreationOptionsResponse>, AuthError> {
    let user = load_user(&auth_state, principal.user_id).await?;
    let existing = auth_state.store().list_authenticators(user.id).await?;

    let (options, ceremony) =
        auth_state
            .security_keys()
            .start_registration(user.id, &user.email, &existing)?;

    auth_state
        .store()
        .set_pending_challenge(user.id, Some(&ceremony))
        .await?;

    Ok(Json(CreationOptionsResponse { options }))
}

#[utoipa::path(
    post,
    path = "/v1/me/webauthn/register/verify",
    request_body = RegisterVerifyRequest,
    responses(
        (status = 200, description = "Security key registered", body = HardwareStatusResponse),
        (status = 400, description = "Attestation rejected or no ceremony pending", body = crate::api::handlers::auth::error::ErrorBody),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn register_verify(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<RegisterVerifyRequest>,
) -> Result<Json<HardwareStatusResponse>, AuthError> {
    let user = load_user(&auth_state, principal.user_id).await?;
    let pending = take_pending_challenge(&auth_state, &user).await?;

    let record = auth_state
        .security_keys()
        .finish_registration(pending.as_deref(), &request.credential, user.id)
        .map_err(|err| {
            warn!(user_id = %user.id, "Security key registration failed: {err}");
            AuthError::from(err)
        })?;

    auth_state.store().insert_authenticator(&record).await?;
    let authenticators = auth_state.store().list_authenticators(user.id).await?.len();
    info!(user_id = %user.id, authenticators, "Security key registered");

    Ok(Json(HardwareStatusResponse {
        hardware_bound: true,
        authenticators,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/me/webauthn/credentials",
    responses(
        (status = 200, description = "Registered security keys", body = [AuthenticatorSummary]),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn list_credentials(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<Vec<AuthenticatorSummary>>, AuthError> {
    let records = auth_state
        .store()
        .list_authenticators(principal.user_id)
        .await?;
    let summaries = records
        .into_iter()
        .map(|record| AuthenticatorSummary {
            credential_id: Base64UrlUnpadded::encode_string(&record.credential_id),
            counter: record.counter,
            transports: record.transports,
            created_at: record.created_at,
        })
        .collect();
    Ok(Json(summaries))
}

#[utoipa::path(
    post,
    path = "/v1/me/webauthn/disable",
    responses(
        (status = 200, description = "All security keys removed", body = HardwareStatusResponse),
        (status = 401, description = "Authentication required", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn disable(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<HardwareStatusResponse>, AuthError> {
    let user = load_user(&auth_state, principal.user_id).await?;
    let removed = auth_state.store().delete_authenticators(user.id).await?;
    info!(user_id = %user.id, removed, "Security keys removed");
    Ok(Json(HardwareStatusResponse {
        hardware_bound: false,
        authenticators: 0,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/webauthn/login/options",
    request_body = PendingTokenRequest,
    responses(
        (status = 200, description = "Assertion options for navigator.credentials.get", body = RequestOptionsResponse),
        (status = 400, description = "No security keys registered", body = crate::api::handlers::auth::error::ErrorBody),
        (status = 401, description = "Pending credential invalid or already used", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn login_options(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PendingTokenRequest>,
) -> Result<Json<RequestOptionsResponse>, AuthError> {
    let claims = resolve_pending(&auth_state, &request.pending_token).await?;
    let user = load_user(&auth_state, claims.user_id).await?;
    let records = auth_state.store().list_authenticators(user.id).await?;

    let (options, ceremony) = auth_state.security_keys().start_authentication(&records)?;

    auth_state
        .store()
        .set_pending_challenge(user.id, Some(&ceremony))
        .await?;

    Ok(Json(RequestOptionsResponse { options }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/webauthn/login/verify",
    request_body = AssertionVerifyRequest,
    responses(
        (status = 200, description = "Assertion accepted; session granted", body = crate::api::handlers::auth::types::SessionGranted),
        (status = 400, description = "Assertion rejected or no ceremony pending", body = crate::api::handlers::auth::error::ErrorBody),
        (status = 401, description = "Pending credential invalid, or cloned authenticator", body = crate::api::handlers::auth::error::ErrorBody)
    ),
    tag = "mfa"
)]
pub async fn login_verify(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<AssertionVerifyRequest>,
) -> Result<Response, AuthError> {
    let claims = resolve_pending(&auth_state, &request.pending_token).await?;
    let user = load_user(&auth_state, claims.user_id).await?;
    let pending = take_pending_challenge(&auth_state, &user).await?;
    let records = auth_state.store().list_authenticators(user.id).await?;

    let update = auth_state
        .security_keys()
        .finish_authentication(
            pending.as_deref(),
            &request.credential,
            &records,
            auth_state.config().enforce_authenticator_counter(),
        )
        .map_err(|err| {
            warn!(user_id = %user.id, "Security key assertion failed: {err}");
            AuthError::from(err)
        })?;

    auth_state
        .store()
        .update_authenticator(&update.credential_id, update.counter, &update.public_key)
        .await?;

    complete_second_factor(
        &auth_state,
        &request.pending_token,
        &claims,
        request.remember,
        request.delivery,
    )
    .await
}
