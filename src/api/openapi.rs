use super::handlers::{
    admin,
    auth::{self, mfa},
    health, lab, me,
};
use axum::middleware;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Public routes carry no credential or a pending one in the body. Everything
/// under `protected` runs behind the credential validator.
/// Routes added outside (like `/`) are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let protected = OpenApiRouter::new()
        .routes(routes!(auth::session::session))
        .routes(routes!(me::me))
        .routes(routes!(mfa::totp::setup))
        .routes(routes!(mfa::totp::enable))
        .routes(routes!(mfa::totp::disable))
        .routes(routes!(mfa::webauthn::register_options))
        .routes(routes!(mfa::webauthn::register_verify))
        .routes(routes!(mfa::webauthn::list_credentials))
        .routes(routes!(mfa::webauthn::disable))
        .routes(routes!(admin::purge_user))
        .layer(middleware::from_fn(auth::validate_credential));

    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![
        tag("phishlab", "Phishing defense lab API"),
        tag("auth", "Registration, login, session and logout"),
        tag("mfa", "TOTP and security key second factors"),
        tag("me", "Authenticated principal"),
        tag("lab", "Proxy detection and domain verification demos"),
        tag("admin", "Administrative actions"),
        tag("health", "Build information"),
    ]);

    OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::session::logout))
        .routes(routes!(mfa::totp::verify))
        .routes(routes!(mfa::webauthn::login_options))
        .routes(routes!(mfa::webauthn::login_verify))
        .routes(routes!(lab::guarded_login))
        .routes(routes!(lab::domain))
        .merge(protected)
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let non_empty = |value: &'_ str| -> bool { !value.is_empty() };
    match author.split_once('<') {
        Some((name, email)) => (
            Some(name.trim()).filter(|v| non_empty(v)),
            Some(email.trim_end_matches('>').trim()).filter(|v| non_empty(v)),
        ),
        None => (Some(author.trim()).filter(|v| non_empty(v)), None),
    }
}
