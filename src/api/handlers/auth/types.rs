//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

use super::delivery::Delivery;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub user_id: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
    #[serde(default)]
    pub delivery: Delivery,
}

/// Body of a fully authenticated login. `token` is only present for bearer
/// delivery.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionGranted {
    pub status: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub delivery: Delivery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Returned instead of a credential when a second factor is still required.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SecondFactorRequired {
    /// `mfa_required` (TOTP) or `fido_required` (security key).
    pub status: String,
    pub pending_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpVerifyRequest {
    pub pending_token: String,
    pub code: String,
    #[serde(default)]
    pub remember: bool,
    #[serde(default)]
    pub delivery: Delivery,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutResponse {
    /// `revoked`, `already_revoked`, `no_session`, or `not_recorded` when the
    /// ledger write failed.
    pub status: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpSetupResponse {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpEnableRequest {
    pub secret: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpStatusResponse {
    pub enabled: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PendingTokenRequest {
    pub pending_token: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct CreationOptionsResponse {
    #[schema(value_type = Object)]
    pub options: CreationChallengeResponse,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RequestOptionsResponse {
    #[schema(value_type = Object)]
    pub options: RequestChallengeResponse,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterVerifyRequest {
    #[schema(value_type = Object)]
    pub credential: RegisterPublicKeyCredential,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct AssertionVerifyRequest {
    pub pending_token: String,
    #[schema(value_type = Object)]
    pub credential: PublicKeyCredential,
    #[serde(default)]
    pub remember: bool,
    #[serde(default)]
    pub delivery: Delivery,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthenticatorSummary {
    /// Base64url, unpadded.
    pub credential_id: String,
    pub counter: i64,
    pub transports: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct HardwareStatusResponse {
    pub hardware_bound: bool,
    pub authenticators: usize,
}
