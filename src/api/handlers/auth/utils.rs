//! Small helpers for auth validation.

use axum::http::{HeaderMap, header::HOST};
use regex::Regex;

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Headers a reverse proxy (or an `AiTM` kit such as Evilginx) typically adds.
const PROXY_HEADERS: [&str; 5] = [
    "via",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "forwarded",
];

/// Collect every proxy indicator on the request.
///
/// Returns an empty list for a direct request to `expected_host`.
pub(crate) fn proxy_signals(headers: &HeaderMap, expected_host: &str) -> Vec<String> {
    let mut signals: Vec<String> = PROXY_HEADERS
        .iter()
        .filter(|name| headers.contains_key(**name))
        .map(|name| format!("header:{name}"))
        .collect();

    if let Some(host) = headers.get(HOST).and_then(|value| value.to_str().ok()) {
        if !host.trim().eq_ignore_ascii_case(expected_host) {
            signals.push(format!("host:{}", host.trim()));
        }
    }

    signals
}
