//! Auth handlers and supporting modules.
//!
//! This module owns the credential lifecycle: primary-factor login, the
//! second-factor state machine, credential delivery, validation and revocation.
//!
//! ## Validation Order
//!
//! The validator middleware checks the revocation ledger first and only then
//! the signature and expiry. A ledger read failure fails closed (500).
//!
//! ## Delivery
//!
//! Login callers pick `cookie` or `bearer`. Cookie delivery never echoes the
//! credential in the response body.

pub(crate) mod credential;
pub(crate) mod delivery;
pub(crate) mod error;
pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod middleware;
mod password;
pub(crate) mod principal;
pub(crate) mod register;
pub(crate) mod session;
mod state;
pub(crate) mod types;
pub(crate) mod utils;

pub use credential::{CredentialIssuer, IssuedCredential, Lifetime, Purpose};
pub use delivery::{Delivery, SESSION_COOKIE_NAME};
pub use error::AuthError;
pub use middleware::validate_credential;
pub use principal::Principal;
pub use state::{AuthConfig, AuthState, Environment};

#[cfg(test)]
mod tests;
