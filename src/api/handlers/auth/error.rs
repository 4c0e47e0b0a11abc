//! HTTP-facing auth errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::webauthn::SecurityKeyError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("session terminated, please sign in again")]
    SessionRevoked,
    #[error("session expired or invalid")]
    SessionExpiredOrMalformed,
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid code")]
    SecondFactorInvalid,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("email already registered")]
    EmailTaken,
    #[error("principal not found")]
    PrincipalNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("request appears to be relayed through a proxy")]
    ProxyDetected(Vec<String>),
    #[error("security key ceremony failed: {0}")]
    CeremonyFailed(String),
    #[error("authenticator counter did not advance; possible cloned authenticator")]
    ClonedAuthenticator,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<String>,
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::SessionRevoked
            | Self::SessionExpiredOrMalformed
            | Self::Unauthenticated
            | Self::ClonedAuthenticator => StatusCode::UNAUTHORIZED,
            Self::SecondFactorInvalid | Self::InvalidRequest(_) | Self::CeremonyFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::PrincipalNotFound => StatusCode::NOT_FOUND,
            Self::Forbidden | Self::ProxyDetected(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::SessionRevoked => "session_revoked",
            Self::SessionExpiredOrMalformed => "session_invalid",
            Self::Unauthenticated => "unauthenticated",
            Self::SecondFactorInvalid => "second_factor_invalid",
            Self::InvalidRequest(_) => "invalid_request",
            Self::EmailTaken => "email_taken",
            Self::PrincipalNotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::ProxyDetected(_) => "proxy_detected",
            Self::CeremonyFailed(_) => "ceremony_failed",
            Self::ClonedAuthenticator => "cloned_authenticator",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<SecurityKeyError> for AuthError {
    fn from(err: SecurityKeyError) -> Self {
        match err {
            SecurityKeyError::CounterRegressed { .. } => Self::ClonedAuthenticator,
            SecurityKeyError::Serialization(err) => {
                Self::Internal(anyhow::Error::new(err).context("security key state"))
            }
            other => Self::CeremonyFailed(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match &self {
            Self::Internal(err) => {
                // Internal details never leave the process.
                error!("Internal auth error: {err:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let signals = match self {
            Self::ProxyDetected(signals) => signals,
            _ => Vec::new(),
        };
        let body = ErrorBody {
            error: kind,
            message,
            signals,
        };
        (status, Json(body)).into_response()
    }
}
