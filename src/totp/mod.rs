//! Time-based one-time passcodes (RFC 6238: SHA1, 6 digits, 30 s step).

pub mod service;

pub use service::{TotpEnrollment, TotpService};

#[cfg(test)]
pub(crate) use service::current_code;
