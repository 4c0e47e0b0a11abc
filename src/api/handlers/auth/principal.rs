//! Authenticated principal extraction.
//!
//! The validator middleware attaches a [`Principal`] to the request extensions.
//! Handlers take `Principal` as an extractor; when the validator found no
//! credential the extractor answers 401.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::AuthError;

/// Authenticated user context derived from a validated session credential.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    /// Verbatim credential, kept so logout-style handlers can revoke it.
    pub credential: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}
