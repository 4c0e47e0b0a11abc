//! Session delivery: cookie-carried or bearer-carried.
//!
//! Issuer and validator never look at the delivery mode; it only decides where
//! the minted credential travels.

use axum::{
    Json,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{credential::IssuedCredential, state::AuthConfig, types::SessionGranted};

pub const SESSION_COOKIE_NAME: &str = "lab_session";

#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    #[default]
    Cookie,
    Bearer,
}

/// Build the `HttpOnly` session cookie.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let same_site = config.session_cookie_same_site();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite={same_site}; Max-Age={max_age}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    session_cookie(config, "", 0)
}

/// Wrap a freshly issued session credential in the requested transport.
pub(super) fn deliver(
    config: &AuthConfig,
    delivery: Delivery,
    issued: &IssuedCredential,
    user_id: Uuid,
    email: &str,
) -> Response {
    let mut body = SessionGranted {
        status: "ok".to_string(),
        user_id: user_id.to_string(),
        email: email.to_string(),
        expires_at: issued.expires_at,
        delivery,
        token: None,
    };

    match delivery {
        Delivery::Bearer => {
            body.token = Some(issued.token.clone());
            (StatusCode::OK, Json(body)).into_response()
        }
        Delivery::Cookie => match session_cookie(config, &issued.token, issued.max_age) {
            Ok(cookie) => {
                let mut headers = HeaderMap::new();
                headers.insert(SET_COOKIE, cookie);
                (StatusCode::OK, headers, Json(body)).into_response()
            }
            Err(err) => {
                error!("Failed to build session cookie: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}

/// Locate the credential: cookie first, then `Authorization: Bearer`.
pub(crate) fn extract_credential(headers: &HeaderMap) -> Option<String> {
    extract_cookie_token(headers).or_else(|| extract_bearer_token(headers))
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
