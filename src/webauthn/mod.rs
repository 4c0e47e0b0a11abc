//! Hardware security keys as a second factor.

pub mod service;

pub use service::{AuthenticatorUpdate, SecurityKeyError, SecurityKeyService, counter_regressed};
