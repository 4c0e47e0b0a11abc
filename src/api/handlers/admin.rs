//! Administrative purge.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::auth::{AuthError, AuthState, Principal};

#[utoipa::path(
    delete,
    path = "/v1/admin/users/{id}",
    params(
        ("id" = Uuid, Path, description = "Principal to purge")
    ),
    responses(
        (status = 204, description = "Principal and its security keys deleted"),
        (status = 401, description = "Authentication required", body = super::auth::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = super::auth::error::ErrorBody),
        (status = 404, description = "No such principal", body = super::auth::error::ErrorBody)
    ),
    tag = "admin"
)]
pub async fn purge_user(
    principal: Principal,
    auth_state: Extension<Arc<AuthState>>,
    Path(target): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let caller = auth_state.store().find_user(principal.user_id).await?;
    if !caller.is_some_and(|caller| caller.is_admin) {
        warn!(user_id = %principal.user_id, %target, "Purge refused: caller is not an admin");
        return Err(AuthError::Forbidden);
    }

    if !auth_state.store().delete_user(target).await? {
        return Err(AuthError::PrincipalNotFound);
    }

    info!(admin = %principal.user_id, %target, "Principal purged");
    Ok(StatusCode::NO_CONTENT)
}
