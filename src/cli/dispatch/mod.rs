//! Map validated CLI matches to an [`Action`].

use crate::cli::actions::{Action, prune, server};
use crate::cli::commands::{self, auth};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub) = matches.subcommand_matches(commands::CMD_PRUNE) {
        let dsn = sub
            .get_one::<String>(commands::ARG_DSN)
            .or_else(|| matches.get_one::<String>(commands::ARG_DSN))
            .cloned()
            .context("missing required argument: --dsn (prune needs a database)")?;
        return Ok(Action::Prune(prune::Args { dsn }));
    }

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches.get_one::<String>(commands::ARG_DSN).cloned();
    let auth_opts = auth::Options::parse(matches);

    Ok(Action::Server(server::Args {
        port,
        dsn,
        environment: auth_opts.environment,
        signing_secret: auth_opts.signing_secret.map(SecretString::from),
        frontend_base_url: auth_opts.frontend_base_url,
        expected_host: auth_opts.expected_host,
        admin_email: auth_opts.admin_email,
        webauthn_rp_id: auth_opts.webauthn_rp_id,
        webauthn_rp_origin: auth_opts.webauthn_rp_origin,
        totp_issuer: auth_opts.totp_issuer,
        enforce_authenticator_counter: auth_opts.enforce_authenticator_counter,
    }))
}
