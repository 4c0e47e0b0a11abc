use clap::{Arg, ArgAction, Command};

use crate::api::Environment;

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_SIGNING_SECRET: &str = "signing-secret";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_WEBAUTHN_RP_ID: &str = "webauthn-rp-id";
pub const ARG_WEBAUTHN_RP_ORIGIN: &str = "webauthn-rp-origin";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_ENFORCE_COUNTER: &str = "enforce-authenticator-counter";
pub const ARG_EXPECTED_HOST: &str = "expected-host";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_credential_args(command);
    with_second_factor_args(command)
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment: development or production")
                .long_help(
                    "Deployment environment. Production requires --signing-secret and marks the session cookie Secure.",
                )
                .env("PHISHLAB_ENVIRONMENT")
                .default_value("development")
                .value_parser(clap::value_parser!(Environment)),
        )
        .arg(
            Arg::new(ARG_SIGNING_SECRET)
                .long(ARG_SIGNING_SECRET)
                .help("HMAC secret used to sign session credentials")
                .env("PHISHLAB_SIGNING_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Origin the lab frontend is served from")
                .env("PHISHLAB_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_EXPECTED_HOST)
                .long(ARG_EXPECTED_HOST)
                .help("Host header the guarded login expects (default: from frontend URL)")
                .env("PHISHLAB_EXPECTED_HOST"),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Email that is granted admin rights when it registers")
                .env("PHISHLAB_ADMIN_EMAIL"),
        )
}

fn with_second_factor_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ID)
                .long(ARG_WEBAUTHN_RP_ID)
                .help("WebAuthn relying party id (default: frontend host)")
                .env("PHISHLAB_WEBAUTHN_RP_ID"),
        )
        .arg(
            Arg::new(ARG_WEBAUTHN_RP_ORIGIN)
                .long(ARG_WEBAUTHN_RP_ORIGIN)
                .help("WebAuthn relying party origin (default: frontend origin)")
                .env("PHISHLAB_WEBAUTHN_RP_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer label shown in authenticator apps")
                .env("PHISHLAB_TOTP_ISSUER")
                .default_value("Phishlab"),
        )
        .arg(
            Arg::new(ARG_ENFORCE_COUNTER)
                .long(ARG_ENFORCE_COUNTER)
                .help("Reject security key assertions whose signature counter went backwards")
                .env("PHISHLAB_ENFORCE_AUTHENTICATOR_COUNTER")
                .action(ArgAction::SetTrue),
        )
}

/// Auth settings pulled out of validated matches.
#[derive(Debug)]
pub struct Options {
    pub environment: Environment,
    pub signing_secret: Option<String>,
    pub frontend_base_url: String,
    pub expected_host: Option<String>,
    pub admin_email: Option<String>,
    pub webauthn_rp_id: Option<String>,
    pub webauthn_rp_origin: Option<String>,
    pub totp_issuer: String,
    pub enforce_authenticator_counter: bool,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        let string = |id: &str| matches.get_one::<String>(id).cloned();
        Self {
            environment: matches
                .get_one::<Environment>(ARG_ENVIRONMENT)
                .copied()
                .unwrap_or_default(),
            signing_secret: string(ARG_SIGNING_SECRET).filter(|s| !s.is_empty()),
            frontend_base_url: string(ARG_FRONTEND_BASE_URL)
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            expected_host: string(ARG_EXPECTED_HOST),
            admin_email: string(ARG_ADMIN_EMAIL),
            webauthn_rp_id: string(ARG_WEBAUTHN_RP_ID),
            webauthn_rp_origin: string(ARG_WEBAUTHN_RP_ORIGIN),
            totp_issuer: string(ARG_TOTP_ISSUER).unwrap_or_else(|| "Phishlab".to_string()),
            enforce_authenticator_counter: matches.get_flag(ARG_ENFORCE_COUNTER),
        }
    }
}
