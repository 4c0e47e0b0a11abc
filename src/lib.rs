//! # Phishlab (Phishing Defense Lab)
//!
//! `phishlab` is a teaching server that puts several authentication designs
//! side by side so their resistance to credential and session theft can be
//! compared: cookie sessions, bearer credentials, header-based proxy
//! detection, client-side domain verification and hardware security keys.
//!
//! ## Credential Lifecycle
//!
//! After primary-factor authentication the server mints a signed, time-bounded
//! credential (HS256). The credential is delivered either as an `HttpOnly`
//! cookie or in the JSON body for bearer use; the issuer and validator never
//! know which.
//!
//! - **Second Factor:** principals with TOTP or a registered security key first
//!   receive a short-lived pending credential that only the step-up endpoints
//!   accept.
//! - **Revocation:** logout writes the verbatim credential into the revocation
//!   ledger. Every protected request consults the ledger *before* the signature,
//!   so a stolen copy stops working immediately.
//!
//! ## Storage
//!
//! Postgres (via `sqlx`) when a DSN is configured, otherwise an in-process store
//! with identical semantics.

pub mod api;
pub mod cli;
pub mod store;
pub mod totp;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
