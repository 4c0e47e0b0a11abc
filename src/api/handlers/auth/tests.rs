//! Auth flow tests driven through the full router.

use super::{
    AuthConfig, AuthError, AuthState, Delivery, Lifetime, SESSION_COOKIE_NAME,
    mfa::{complete_second_factor, resolve_pending},
};
use crate::api::app;
use crate::store::{
    AuthenticatorRecord, AuthenticatorStore, CreateUserOutcome, MemoryStore, RevocationLedger,
    RevokeOutcome, Store, UserRecord, UserStore,
};
use crate::totp::current_code;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderMap, Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HOST, SET_COOKIE},
    },
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;
use uuid::Uuid;
use webauthn_authenticator_rs::{WebauthnAuthenticator, softtoken::SoftToken};
use webauthn_rs::prelude::{CreationChallengeResponse, RequestChallengeResponse};

const TEST_SECRET: &str = "auth-tests-signing-secret-0123456789abcdef";
const ADMIN_EMAIL: &str = "admin@lab.test";
const PASSWORD: &str = "correct horse battery";

fn config() -> AuthConfig {
    AuthConfig::new("http://localhost:8080".to_string())
        .with_signing_secret(SecretString::from(TEST_SECRET.to_string()))
        .with_admin_email(ADMIN_EMAIL.to_string())
}

struct Lab {
    store: Arc<MemoryStore>,
    state: Arc<AuthState>,
    app: Router,
}

impl Lab {
    fn new() -> Result<Self> {
        Self::with_config(config())
    }

    fn with_config(config: AuthConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn Store> = store.clone();
        let state = Arc::new(AuthState::new(config, shared)?);
        Ok(Self {
            store,
            app: app(state.clone()),
            state,
        })
    }

    async fn send(&self, request: Request<Body>) -> Result<Reply> {
        send(&self.app, request).await
    }

    async fn register(&self, email: &str) -> Result<Uuid> {
        let reply = self
            .send(json_request(
                Method::POST,
                "/v1/auth/register",
                &json!({"email": email, "password": PASSWORD}),
            )?)
            .await?;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        let id = reply.str("user_id")?;
        Ok(Uuid::parse_str(&id)?)
    }

    async fn login(&self, email: &str, delivery: &str) -> Result<Reply> {
        self.send(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({"email": email, "password": PASSWORD, "delivery": delivery}),
        )?)
        .await
    }

    /// Register and log in with bearer delivery; returns the session token.
    async fn session_for(&self, email: &str) -> Result<(Uuid, String)> {
        let user_id = self.register(email).await?;
        let reply = self.login(email, "bearer").await?;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        Ok((user_id, reply.str("token")?))
    }

    async fn user(&self, user_id: Uuid) -> Result<UserRecord> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| anyhow!("user {user_id} missing"))
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn str(&self, field: &str) -> Result<String> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("missing `{field}` in {}", self.body))
    }

    fn error_kind(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    fn set_cookie(&self) -> Option<&str> {
        self.headers.get(SET_COOKIE).and_then(|v| v.to_str().ok())
    }
}

async fn send(app: &Router, request: Request<Body>) -> Result<Reply> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(Reply {
        status,
        headers,
        body,
    })
}

fn json_request(method: Method, uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn bearer(method: Method, uri: &str, token: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?)
}

fn bearer_json(method: Method, uri: &str, token: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn sign(payload: &Value) -> Result<String> {
    Ok(encode(
        &Header::new(Algorithm::HS256),
        payload,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )?)
}

#[tokio::test]
async fn bearer_login_reaches_protected_route() -> Result<()> {
    let lab = Lab::new()?;
    let (user_id, token) = lab.session_for("alice@lab.test").await?;

    let reply = lab.send(bearer(Method::GET, "/v1/me", &token)?).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("user_id")?, user_id.to_string());
    assert_eq!(reply.str("email")?, "alice@lab.test");
    Ok(())
}

#[tokio::test]
async fn cookie_login_sets_cookie_and_omits_token() -> Result<()> {
    let lab = Lab::new()?;
    lab.register("bob@lab.test").await?;

    let reply = lab.login("bob@lab.test", "cookie").await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.get("token").is_none());

    let set_cookie = reply.set_cookie().context("missing Set-Cookie")?;
    assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=")));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Max-Age=3600"));
    assert!(!set_cookie.contains("Secure"));

    let pair = set_cookie.split(';').next().unwrap_or_default();
    let request = Request::builder()
        .uri("/v1/auth/session")
        .header(COOKIE, pair)
        .body(Body::empty())?;
    let reply = lab.send(request).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("email")?, "bob@lab.test");
    Ok(())
}

#[tokio::test]
async fn remembered_cookie_lasts_a_year() -> Result<()> {
    let lab = Lab::new()?;
    lab.register("carol@lab.test").await?;

    let reply = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({"email": "carol@lab.test", "password": PASSWORD, "remember": true}),
        )?)
        .await?;
    let set_cookie = reply.set_cookie().context("missing Set-Cookie")?;
    assert!(set_cookie.contains(&format!("Max-Age={}", 365 * 24 * 3600)));
    Ok(())
}

#[tokio::test]
async fn logout_then_replay_is_revoked() -> Result<()> {
    let lab = Lab::new()?;
    let (_, token) = lab.session_for("dave@lab.test").await?;

    let reply = lab
        .send(bearer(Method::POST, "/v1/auth/logout", &token)?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("status")?, "revoked");
    assert!(reply.set_cookie().is_some_and(|c| c.contains("Max-Age=0")));

    let replay = lab.send(bearer(Method::GET, "/v1/me", &token)?).await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.error_kind(), Some("session_revoked"));
    assert_eq!(
        replay.str("message")?,
        "session terminated, please sign in again"
    );
    Ok(())
}

#[tokio::test]
async fn repeated_logout_is_idempotent() -> Result<()> {
    let lab = Lab::new()?;
    let (_, token) = lab.session_for("erin@lab.test").await?;

    let first = lab
        .send(bearer(Method::POST, "/v1/auth/logout", &token)?)
        .await?;
    let second = lab
        .send(bearer(Method::POST, "/v1/auth/logout", &token)?)
        .await?;
    assert_eq!(first.str("status")?, "revoked");
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.str("status")?, "already_revoked");
    assert_eq!(lab.store.revoked_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn logout_without_credential_still_clears_cookie() -> Result<()> {
    let lab = Lab::new()?;
    let reply = lab
        .send(Request::builder().method(Method::POST).uri("/v1/auth/logout").body(Body::empty())?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("status")?, "no_session");
    assert!(reply.set_cookie().is_some_and(|c| c.contains("Max-Age=0")));
    Ok(())
}

#[tokio::test]
async fn totp_step_up_grants_session() -> Result<()> {
    let lab = Lab::new()?;
    let (_, token) = lab.session_for("frank@lab.test").await?;

    let setup = lab
        .send(bearer(Method::POST, "/v1/me/totp/setup", &token)?)
        .await?;
    assert_eq!(setup.status, StatusCode::OK);
    let secret = setup.str("secret")?;
    assert!(setup.str("otpauth_url")?.starts_with("otpauth://totp/"));

    let enable = lab
        .send(bearer_json(
            Method::POST,
            "/v1/me/totp/enable",
            &token,
            &json!({"secret": secret, "code": current_code(&secret)?}),
        )?)
        .await?;
    assert_eq!(enable.status, StatusCode::OK);
    assert_eq!(enable.body.get("enabled"), Some(&Value::Bool(true)));

    let login = lab.login("frank@lab.test", "bearer").await?;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.str("status")?, "mfa_required");
    assert!(login.body.get("token").is_none());
    let pending = login.str("pending_token")?;

    let verify = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": pending, "code": current_code(&secret)?, "delivery": "bearer"}),
        )?)
        .await?;
    assert_eq!(verify.status, StatusCode::OK, "{}", verify.body);
    let session = verify.str("token")?;

    let me = lab.send(bearer(Method::GET, "/v1/me", &session)?).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body.get("totp_enabled"), Some(&Value::Bool(true)));

    // The pending credential was consumed.
    let replay = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": pending, "code": current_code(&secret)?}),
        )?)
        .await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.error_kind(), Some("session_revoked"));
    Ok(())
}

#[tokio::test]
async fn wrong_totp_code_keeps_pending_state() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("grace@lab.test").await?;
    let secret = lab.state.totp().enroll("grace@lab.test")?.secret;
    lab.store.set_totp_secret(user_id, Some(&secret)).await?;

    let login = lab.login("grace@lab.test", "bearer").await?;
    let pending = login.str("pending_token")?;
    let good = current_code(&secret)?;
    let wrong = if good == "000000" { "111111" } else { "000000" };

    let reply = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": pending, "code": wrong}),
        )?)
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_kind(), Some("second_factor_invalid"));
    assert_eq!(reply.str("message")?, "invalid code");

    let retry = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": pending, "code": good}),
        )?)
        .await?;
    assert_eq!(retry.status, StatusCode::OK);
    assert!(retry.set_cookie().is_some());
    assert!(retry.body.get("token").is_none());
    Ok(())
}

#[tokio::test]
async fn pending_credential_is_not_a_session() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("heidi@lab.test").await?;
    let secret = lab.state.totp().enroll("heidi@lab.test")?.secret;
    lab.store.set_totp_secret(user_id, Some(&secret)).await?;

    let pending = lab.login("heidi@lab.test", "bearer").await?.str("pending_token")?;
    let reply = lab.send(bearer(Method::GET, "/v1/me", &pending)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_kind(), Some("session_invalid"));
    Ok(())
}

#[tokio::test]
async fn session_credential_cannot_step_up() -> Result<()> {
    let lab = Lab::new()?;
    let (_, token) = lab.session_for("ivan@lab.test").await?;
    let reply = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": token, "code": "123456"}),
        )?)
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_credential() -> Result<()> {
    let lab = Lab::new()?;
    for uri in ["/v1/me", "/v1/auth/session", "/v1/me/webauthn/credentials"] {
        let reply = lab
            .send(Request::builder().uri(uri).body(Body::empty())?)
            .await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(reply.error_kind(), Some("unauthenticated"));
    }
    Ok(())
}

#[tokio::test]
async fn malformed_credential_is_rejected() -> Result<()> {
    let lab = Lab::new()?;
    let reply = lab
        .send(bearer(Method::GET, "/v1/me", "not-a-credential")?)
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_kind(), Some("session_invalid"));
    Ok(())
}

#[tokio::test]
async fn disabling_hardware_clears_binding() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("judy@lab.test").await?;
    lab.store
        .insert_authenticator(&AuthenticatorRecord {
            credential_id: vec![1, 2, 3, 4],
            user_id,
            public_key: b"{}".to_vec(),
            counter: 0,
            transports: None,
            created_at: Utc::now(),
        })
        .await?;
    assert!(lab.user(user_id).await?.hardware_bound);

    let login = lab.login("judy@lab.test", "bearer").await?;
    assert_eq!(login.str("status")?, "fido_required");

    // A security key outranks TOTP, so the TOTP step-up is refused.
    let totp = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/mfa/totp/verify",
            &json!({"pending_token": login.str("pending_token")?, "code": "123456"}),
        )?)
        .await?;
    assert_eq!(totp.status, StatusCode::BAD_REQUEST);

    let session = lab
        .state
        .issuer()
        .issue(user_id, "judy@lab.test", Lifetime::Session)?;
    let listed = lab
        .send(bearer(Method::GET, "/v1/me/webauthn/credentials", &session.token)?)
        .await?;
    assert_eq!(listed.body.as_array().map(Vec::len), Some(1));

    let disable = lab
        .send(bearer(Method::POST, "/v1/me/webauthn/disable", &session.token)?)
        .await?;
    assert_eq!(disable.status, StatusCode::OK);
    assert_eq!(disable.body.get("hardware_bound"), Some(&Value::Bool(false)));

    assert!(!lab.user(user_id).await?.hardware_bound);
    assert!(lab.store.list_authenticators(user_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn registration_options_overwrite_the_single_slot() -> Result<()> {
    let lab = Lab::new()?;
    let (user_id, token) = lab.session_for("ken@lab.test").await?;

    let first = lab
        .send(bearer(Method::POST, "/v1/me/webauthn/register/options", &token)?)
        .await?;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    let slot_one = lab.user(user_id).await?.pending_challenge;

    lab.send(bearer(Method::POST, "/v1/me/webauthn/register/options", &token)?)
        .await?;
    let slot_two = lab.user(user_id).await?.pending_challenge;

    assert!(slot_one.is_some());
    assert!(slot_two.is_some());
    assert_ne!(slot_one, slot_two);
    Ok(())
}

#[tokio::test]
async fn security_key_login_without_keys_fails() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("leo@lab.test").await?;
    let pending = lab
        .state
        .issuer()
        .issue(user_id, "leo@lab.test", Lifetime::Pending)?;

    let reply = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/webauthn/login/options",
            &json!({"pending_token": pending.token}),
        )?)
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_kind(), Some("ceremony_failed"));
    Ok(())
}

const ORIGIN: &str = "http://localhost:8080";

fn soft_key() -> Result<WebauthnAuthenticator<SoftToken>> {
    let (token, _ca) = SoftToken::new(true).map_err(|e| anyhow!("soft token: {e:?}"))?;
    Ok(WebauthnAuthenticator::new(token))
}

/// Run the registration ceremony for the session holder.
async fn enrol_security_key(
    lab: &Lab,
    token: &str,
    key: &mut WebauthnAuthenticator<SoftToken>,
) -> Result<Reply> {
    let options = lab
        .send(bearer(Method::POST, "/v1/me/webauthn/register/options", token)?)
        .await?;
    assert_eq!(options.status, StatusCode::OK, "{}", options.body);
    let challenge: CreationChallengeResponse =
        serde_json::from_value(options.body.get("options").cloned().unwrap_or_default())?;

    let credential = key
        .do_registration(Url::parse(ORIGIN)?, challenge)
        .map_err(|e| anyhow!("registration: {e:?}"))?;
    lab.send(bearer_json(
        Method::POST,
        "/v1/me/webauthn/register/verify",
        token,
        &json!({"credential": credential}),
    )?)
    .await
}

/// Ask for assertion options with a pending credential.
async fn assertion_challenge(lab: &Lab, pending: &str) -> Result<RequestChallengeResponse> {
    let options = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/webauthn/login/options",
            &json!({"pending_token": pending}),
        )?)
        .await?;
    assert_eq!(options.status, StatusCode::OK, "{}", options.body);
    Ok(serde_json::from_value(
        options.body.get("options").cloned().unwrap_or_default(),
    )?)
}

async fn submit_assertion(
    lab: &Lab,
    pending: &str,
    key: &mut WebauthnAuthenticator<SoftToken>,
    challenge: RequestChallengeResponse,
) -> Result<Reply> {
    let credential = key
        .do_authentication(Url::parse(ORIGIN)?, challenge)
        .map_err(|e| anyhow!("assertion: {e:?}"))?;
    lab.send(json_request(
        Method::POST,
        "/v1/auth/webauthn/login/verify",
        &json!({"pending_token": pending, "credential": credential, "delivery": "bearer"}),
    )?)
    .await
}

/// Password login followed by a security key step-up.
async fn security_key_login(
    lab: &Lab,
    email: &str,
    key: &mut WebauthnAuthenticator<SoftToken>,
) -> Result<(String, Reply)> {
    let login = lab.login(email, "bearer").await?;
    assert_eq!(login.str("status")?, "fido_required");
    let pending = login.str("pending_token")?;
    let challenge = assertion_challenge(lab, &pending).await?;
    let verify = submit_assertion(lab, &pending, key, challenge).await?;
    Ok((pending, verify))
}

#[tokio::test]
async fn security_key_ceremonies_through_the_router() -> Result<()> {
    let lab = Lab::new()?;
    let (user_id, token) = lab.session_for("pat@lab.test").await?;
    let mut key = soft_key()?;

    let enrolled = enrol_security_key(&lab, &token, &mut key).await?;
    assert_eq!(enrolled.status, StatusCode::OK, "{}", enrolled.body);
    assert_eq!(enrolled.body.get("hardware_bound"), Some(&Value::Bool(true)));
    assert_eq!(enrolled.body.get("authenticators"), Some(&json!(1)));

    let user = lab.user(user_id).await?;
    assert!(user.hardware_bound);
    assert!(user.pending_challenge.is_none());

    let mut last_counter = 0;
    for _ in 0..2 {
        let (pending, verify) = security_key_login(&lab, "pat@lab.test", &mut key).await?;
        assert_eq!(verify.status, StatusCode::OK, "{}", verify.body);
        let session = verify.str("token")?;

        let me = lab.send(bearer(Method::GET, "/v1/me", &session)?).await?;
        assert_eq!(me.status, StatusCode::OK);

        let keys = lab.store.list_authenticators(user_id).await?;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].counter > last_counter);
        last_counter = keys[0].counter;
        assert!(lab.user(user_id).await?.pending_challenge.is_none());

        // The pending credential was spent by the step-up.
        let replay = lab
            .send(json_request(
                Method::POST,
                "/v1/auth/webauthn/login/options",
                &json!({"pending_token": pending}),
            )?)
            .await?;
        assert_eq!(replay.error_kind(), Some("session_revoked"));
    }

    let disable = lab
        .send(bearer(Method::POST, "/v1/me/webauthn/disable", &token)?)
        .await?;
    assert_eq!(disable.status, StatusCode::OK);
    assert!(!lab.user(user_id).await?.hardware_bound);

    let login = lab.login("pat@lab.test", "bearer").await?;
    assert_eq!(login.str("status")?, "ok");
    Ok(())
}

#[tokio::test]
async fn failed_assertion_clears_the_slot() -> Result<()> {
    let lab = Lab::new()?;
    let (user_id, token) = lab.session_for("quinn@lab.test").await?;
    let mut key = soft_key()?;
    let enrolled = enrol_security_key(&lab, &token, &mut key).await?;
    assert_eq!(enrolled.status, StatusCode::OK, "{}", enrolled.body);

    let login = lab.login("quinn@lab.test", "bearer").await?;
    let pending = login.str("pending_token")?;

    // A second options call overwrites the slot, so the first challenge is stale.
    let stale = assertion_challenge(&lab, &pending).await?;
    assertion_challenge(&lab, &pending).await?;
    assert!(lab.user(user_id).await?.pending_challenge.is_some());

    let verify = submit_assertion(&lab, &pending, &mut key, stale).await?;
    assert_eq!(verify.status, StatusCode::BAD_REQUEST, "{}", verify.body);
    assert_eq!(verify.error_kind(), Some("ceremony_failed"));
    assert!(lab.user(user_id).await?.pending_challenge.is_none());

    // The pending credential survives a failed attempt; a fresh ceremony works.
    let fresh = assertion_challenge(&lab, &pending).await?;
    let verify = submit_assertion(&lab, &pending, &mut key, fresh).await?;
    assert_eq!(verify.status, StatusCode::OK, "{}", verify.body);
    Ok(())
}

async fn login_with_regressed_counter(enforce: bool) -> Result<(Lab, Uuid, Reply)> {
    let lab = Lab::with_config(config().with_enforce_authenticator_counter(enforce))?;
    let (user_id, token) = lab.session_for("rita@lab.test").await?;
    let mut key = soft_key()?;
    let enrolled = enrol_security_key(&lab, &token, &mut key).await?;
    assert_eq!(enrolled.status, StatusCode::OK, "{}", enrolled.body);

    let stored = lab
        .store
        .list_authenticators(user_id)
        .await?
        .pop()
        .context("security key missing")?;
    lab.store
        .update_authenticator(&stored.credential_id, 100, &stored.public_key)
        .await?;

    let (_, verify) = security_key_login(&lab, "rita@lab.test", &mut key).await?;
    Ok((lab, user_id, verify))
}

#[tokio::test]
async fn regressed_counter_is_accepted_when_not_enforced() -> Result<()> {
    let (lab, user_id, verify) = login_with_regressed_counter(false).await?;
    assert_eq!(verify.status, StatusCode::OK, "{}", verify.body);
    let keys = lab.store.list_authenticators(user_id).await?;
    assert_eq!(keys[0].counter, 100);
    Ok(())
}

#[tokio::test]
async fn regressed_counter_is_rejected_when_enforced() -> Result<()> {
    let (lab, user_id, verify) = login_with_regressed_counter(true).await?;
    assert_eq!(verify.status, StatusCode::UNAUTHORIZED, "{}", verify.body);
    assert_eq!(verify.error_kind(), Some("cloned_authenticator"));
    assert!(lab.user(user_id).await?.pending_challenge.is_none());
    Ok(())
}

#[tokio::test]
async fn racing_step_ups_grant_one_session() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("sam@lab.test").await?;
    let pending = lab
        .state
        .issuer()
        .issue(user_id, "sam@lab.test", Lifetime::Pending)?;

    // Both requests validate before either reaches the ledger.
    let first = resolve_pending(&lab.state, &pending.token).await?;
    let second = resolve_pending(&lab.state, &pending.token).await?;

    let granted =
        complete_second_factor(&lab.state, &pending.token, &first, false, Delivery::Bearer)
            .await?;
    assert_eq!(granted.status(), StatusCode::OK);

    let raced =
        complete_second_factor(&lab.state, &pending.token, &second, false, Delivery::Bearer).await;
    assert!(matches!(raced, Err(AuthError::SessionRevoked)));
    Ok(())
}

#[tokio::test]
async fn legacy_id_claim_is_accepted() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = lab.register("mallory@lab.test").await?;
    let exp = (Utc::now() + Duration::minutes(10)).timestamp();
    let token = sign(&json!({"id": user_id, "email": "mallory@lab.test", "exp": exp}))?;

    let reply = lab
        .send(bearer(Method::GET, "/v1/auth/session", &token)?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("user_id")?, user_id.to_string());
    Ok(())
}

#[tokio::test]
async fn ledger_is_checked_before_expiry() -> Result<()> {
    let lab = Lab::new()?;
    let user_id = Uuid::new_v4();
    let expired_at = Utc::now() - Duration::hours(2);
    let token = sign(&json!({
        "userId": user_id,
        "email": "old@lab.test",
        "exp": expired_at.timestamp(),
    }))?;
    lab.store.revoke(&token, expired_at).await?;

    let reply = lab.send(bearer(Method::GET, "/v1/me", &token)?).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_kind(), Some("session_revoked"));
    Ok(())
}

#[tokio::test]
async fn login_failures_are_indistinguishable() -> Result<()> {
    let lab = Lab::new()?;
    lab.register("nina@lab.test").await?;

    let unknown = lab.login("nobody@lab.test", "bearer").await?;
    let wrong = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({"email": "nina@lab.test", "password": "wrong password"}),
        )?)
        .await?;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.body, wrong.body);
    Ok(())
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() -> Result<()> {
    let lab = Lab::new()?;
    lab.register("olivia@lab.test").await?;

    let duplicate = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({"email": "Olivia@Lab.test", "password": PASSWORD}),
        )?)
        .await?;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let short = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({"email": "peggy@lab.test", "password": "short"}),
        )?)
        .await?;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let invalid = lab
        .send(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({"email": "not-an-email", "password": PASSWORD}),
        )?)
        .await?;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn guarded_login_flags_proxy_indicators() -> Result<()> {
    let lab = Lab::new()?;
    lab.register("quinn@lab.test").await?;
    let body = json!({"email": "quinn@lab.test", "password": PASSWORD, "delivery": "bearer"});

    let mut relayed = json_request(Method::POST, "/v1/lab/guarded/login", &body)?;
    relayed
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.7".parse()?);
    let reply = lab.send(relayed).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.error_kind(), Some("proxy_detected"));
    let signals = reply.body.get("signals").cloned().unwrap_or_default();
    assert!(signals
        .as_array()
        .is_some_and(|s| s.contains(&json!("header:x-forwarded-for"))));

    let mut foreign = json_request(Method::POST, "/v1/lab/guarded/login", &body)?;
    foreign.headers_mut().insert(HOST, "evil.example".parse()?);
    let reply = lab.send(foreign).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let mut direct = json_request(Method::POST, "/v1/lab/guarded/login", &body)?;
    direct.headers_mut().insert(HOST, "localhost:8080".parse()?);
    let reply = lab.send(direct).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.get("token").is_some());
    Ok(())
}

#[tokio::test]
async fn domain_reports_expected_origin() -> Result<()> {
    let lab = Lab::new()?;
    let reply = lab
        .send(Request::builder().uri("/v1/lab/domain").body(Body::empty())?)
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("expected_origin")?, "http://localhost:8080");
    assert_eq!(reply.str("rp_id")?, "localhost");
    Ok(())
}

#[tokio::test]
async fn purge_requires_admin() -> Result<()> {
    let lab = Lab::new()?;
    let (_, admin) = lab.session_for(ADMIN_EMAIL).await?;
    let (victim_id, victim) = lab.session_for("rupert@lab.test").await?;
    lab.store
        .insert_authenticator(&AuthenticatorRecord {
            credential_id: vec![9, 9, 9],
            user_id: victim_id,
            public_key: b"{}".to_vec(),
            counter: 0,
            transports: None,
            created_at: Utc::now(),
        })
        .await?;

    let uri = format!("/v1/admin/users/{victim_id}");
    let forbidden = lab.send(bearer(Method::DELETE, &uri, &victim)?).await?;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let missing = lab
        .send(bearer(
            Method::DELETE,
            &format!("/v1/admin/users/{}", Uuid::new_v4()),
            &admin,
        )?)
        .await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let purged = lab.send(bearer(Method::DELETE, &uri, &admin)?).await?;
    assert_eq!(purged.status, StatusCode::NO_CONTENT);
    assert!(lab.store.find_user(victim_id).await?.is_none());
    assert!(lab.store.list_authenticators(victim_id).await?.is_empty());
    Ok(())
}

/// Delegates to a `MemoryStore` but fails ledger reads or writes on demand.
struct FaultyLedger {
    inner: MemoryStore,
    fail_reads: bool,
    fail_writes: bool,
}

#[async_trait]
impl UserStore for FaultyLedger {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<CreateUserOutcome> {
        self.inner.create_user(email, password_hash, is_admin).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        self.inner.find_user(user_id).await
    }

    async fn set_totp_secret(&self, user_id: Uuid, secret: Option<&str>) -> Result<()> {
        self.inner.set_totp_secret(user_id, secret).await
    }

    async fn set_pending_challenge(&self, user_id: Uuid, challenge: Option<&str>) -> Result<()> {
        self.inner.set_pending_challenge(user_id, challenge).await
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool> {
        self.inner.delete_user(user_id).await
    }
}

#[async_trait]
impl AuthenticatorStore for FaultyLedger {
    async fn insert_authenticator(&self, record: &AuthenticatorRecord) -> Result<()> {
        self.inner.insert_authenticator(record).await
    }

    async fn list_authenticators(&self, user_id: Uuid) -> Result<Vec<AuthenticatorRecord>> {
        self.inner.list_authenticators(user_id).await
    }

    async fn update_authenticator(
        &self,
        credential_id: &[u8],
        counter: i64,
        public_key: &[u8],
    ) -> Result<()> {
        self.inner
            .update_authenticator(credential_id, counter, public_key)
            .await
    }

    async fn delete_authenticators(&self, user_id: Uuid) -> Result<u64> {
        self.inner.delete_authenticators(user_id).await
    }
}

#[async_trait]
impl RevocationLedger for FaultyLedger {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<RevokeOutcome> {
        if self.fail_writes {
            return Err(anyhow!("ledger unavailable"));
        }
        self.inner.revoke(token, expires_at).await
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        if self.fail_reads {
            return Err(anyhow!("ledger unavailable"));
        }
        self.inner.is_revoked(token).await
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.prune_expired(now).await
    }
}

fn faulty_app(fail_reads: bool, fail_writes: bool) -> Result<(Arc<AuthState>, Router)> {
    let store: Arc<dyn Store> = Arc::new(FaultyLedger {
        inner: MemoryStore::new(),
        fail_reads,
        fail_writes,
    });
    let state = Arc::new(AuthState::new(config(), store)?);
    Ok((state.clone(), app(state)))
}

#[tokio::test]
async fn failed_revocation_leaves_credential_usable() -> Result<()> {
    let (_, app) = faulty_app(false, true)?;
    send(
        &app,
        json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({"email": "sybil@lab.test", "password": PASSWORD}),
        )?,
    )
    .await?;
    let login = send(
        &app,
        json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({"email": "sybil@lab.test", "password": PASSWORD, "delivery": "bearer"}),
        )?,
    )
    .await?;
    let token = login.str("token")?;

    let logout = send(&app, bearer(Method::POST, "/v1/auth/logout", &token)?).await?;
    assert_eq!(logout.status, StatusCode::OK);
    assert_eq!(logout.str("status")?, "not_recorded");

    let me = send(&app, bearer(Method::GET, "/v1/me", &token)?).await?;
    assert_eq!(me.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn ledger_read_failure_fails_closed() -> Result<()> {
    let (state, app) = faulty_app(true, false)?;
    let issued = state
        .issuer()
        .issue(Uuid::new_v4(), "trent@lab.test", Lifetime::Session)?;

    let reply = send(&app, bearer(Method::GET, "/v1/auth/session", &issued.token)?).await?;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.str("message")?, "internal server error");
    Ok(())
}
