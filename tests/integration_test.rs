//! End-to-end OAuth flow against in-memory collaborators and a stubbed
//! token exchange

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use url::Url;

use gatekey::config::OAuthProviderSettings;
use gatekey::host::{oauth_state_cookie_name, session_cookie_name, RedirectMode};
use gatekey::testing::{MemoryCookieStore, RecordingRedirector, StubCodeExchanger};
use gatekey::{AuthConfig, AuthCore, OAuthCallback, SignInOptions};

const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

fn config() -> AuthConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    AuthConfig::new(SECRET, "https://app.example.com").with_provider(OAuthProviderSettings {
        name: "google".to_owned(),
        client_id: Some("cid".to_owned()),
        client_secret: Some("cs".to_owned()),
        redirect_uri: Some("https://app.example.com/api/auth/callback".to_owned()),
        ..Default::default()
    })
}

fn stub_exchanger() -> Arc<StubCodeExchanger> {
    Arc::new(StubCodeExchanger::new(&json!({
        "sub": "user-123",
        "iss": "https://accounts.google.com",
        "aud": "cid",
        "exp": Utc::now().timestamp() + 3600,
        "email": "user@example.com",
        "name": "Test User",
    })))
}

fn core_with(exchanger: Arc<StubCodeExchanger>) -> AuthCore {
    AuthCore::builder(config())
        .exchanger(exchanger)
        .build()
        .unwrap()
}

fn query_params(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

async fn start_sign_in(
    core: &AuthCore,
    cookies: &mut MemoryCookieStore,
) -> HashMap<String, String> {
    let mut redirector = RecordingRedirector::new();
    core.sign_in(
        cookies,
        &mut redirector,
        "google",
        SignInOptions {
            redirect_to: Some("/dashboard".to_owned()),
            credentials: None,
        },
    )
    .await
    .unwrap();
    query_params(&redirector.last().unwrap().url)
}

#[tokio::test]
async fn sign_in_sets_state_cookie_and_redirects_to_provider() {
    let core = core_with(stub_exchanger());
    let mut cookies = MemoryCookieStore::new();
    let mut redirector = RecordingRedirector::new();

    core.sign_in(
        &mut cookies,
        &mut redirector,
        "google",
        SignInOptions::default(),
    )
    .await
    .unwrap();

    let redirect = redirector.last().unwrap();
    assert_eq!(redirect.mode, RedirectMode::Push);
    let url = Url::parse(&redirect.url).unwrap();
    assert_eq!(url.host_str(), Some("accounts.google.com"));

    let params = query_params(&redirect.url);
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["code_challenge_method"], "S256");
    assert!(cookies.value(oauth_state_cookie_name(true)).is_some());
    assert!(cookies.value(session_cookie_name(true)).is_none());
}

#[tokio::test]
async fn callback_establishes_session_and_consumes_state_cookie() {
    let exchanger = stub_exchanger();
    let core = core_with(Arc::clone(&exchanger));
    let mut cookies = MemoryCookieStore::new();

    let params = start_sign_in(&core, &mut cookies).await;

    let mut redirector = RecordingRedirector::new();
    core.handle_oauth_callback(
        &mut cookies,
        &mut redirector,
        &OAuthCallback {
            code: Some("provider-code".to_owned()),
            state: Some(params["state"].clone()),
            error: None,
        },
    )
    .await
    .unwrap();

    // Exchange ran once, with the code and the verifier bound at sign-in
    let calls = exchanger.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].provider_id, "google");
    assert_eq!(calls[0].code, "provider-code");
    assert!(!calls[0].code_verifier.is_empty());

    // Session cookie set, state cookie gone, user back where they started
    assert!(cookies.value(session_cookie_name(true)).is_some());
    assert!(cookies.value(oauth_state_cookie_name(true)).is_none());
    let redirect = redirector.last().unwrap();
    assert_eq!(redirect.url, "/dashboard");
    assert_eq!(redirect.mode, RedirectMode::Replace);

    let session = core.get_session(&cookies).await.unwrap();
    assert_eq!(session.provider_id, "google");
    assert_eq!(session.claims["email"], json!("user@example.com"));
    assert_eq!(session.claims["sub"], json!("user-123"));
}

#[tokio::test]
async fn state_mismatch_never_reaches_the_exchange() {
    let exchanger = stub_exchanger();
    let core = core_with(Arc::clone(&exchanger));
    let mut cookies = MemoryCookieStore::new();

    start_sign_in(&core, &mut cookies).await;

    let mut redirector = RecordingRedirector::new();
    let err = core
        .handle_oauth_callback(
            &mut cookies,
            &mut redirector,
            &OAuthCallback {
                code: Some("provider-code".to_owned()),
                state: Some("forged-state".to_owned()),
                error: None,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "oauth_state_error");
    assert!(exchanger.calls().is_empty());
    assert!(core.get_session(&cookies).await.is_none());
    // The state cookie is consumed even by a failed callback
    assert!(cookies.value(oauth_state_cookie_name(true)).is_none());
    assert_eq!(
        redirector.last().unwrap().url,
        "/auth/error?error=oauth_state_error"
    );
}

#[tokio::test]
async fn provider_error_parameter_fails_the_callback() {
    let exchanger = stub_exchanger();
    let core = core_with(Arc::clone(&exchanger));
    let mut cookies = MemoryCookieStore::new();

    let params = start_sign_in(&core, &mut cookies).await;

    let mut redirector = RecordingRedirector::new();
    let err = core
        .handle_oauth_callback(
            &mut cookies,
            &mut redirector,
            &OAuthCallback {
                code: None,
                state: Some(params["state"].clone()),
                error: Some("access_denied".to_owned()),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "provider_error");
    assert!(exchanger.calls().is_empty());
}

#[tokio::test]
async fn extend_session_renews_the_cookie_and_is_idempotent() {
    let exchanger = stub_exchanger();
    let core = core_with(Arc::clone(&exchanger));
    let mut cookies = MemoryCookieStore::new();

    let params = start_sign_in(&core, &mut cookies).await;
    let mut redirector = RecordingRedirector::new();
    core.handle_oauth_callback(
        &mut cookies,
        &mut redirector,
        &OAuthCallback {
            code: Some("provider-code".to_owned()),
            state: Some(params["state"].clone()),
            error: None,
        },
    )
    .await
    .unwrap();

    let before = core.get_session(&cookies).await.unwrap();

    assert!(core.extend_session(&mut cookies).await);
    assert!(core.extend_session(&mut cookies).await);

    let after = core.get_session(&cookies).await.unwrap();
    assert_eq!(after.provider_id, before.provider_id);
    assert_eq!(after.claims, before.claims);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.expires_at >= before.expires_at);
}

#[tokio::test]
async fn extend_session_cannot_mint_a_session_from_nothing() {
    let core = core_with(stub_exchanger());
    let mut cookies = MemoryCookieStore::new();
    assert!(!core.extend_session(&mut cookies).await);

    cookies.insert(session_cookie_name(true), "forged");
    assert!(!core.extend_session(&mut cookies).await);
    assert!(core.get_session(&cookies).await.is_none());
}

#[tokio::test]
async fn sign_out_clears_the_session() {
    let exchanger = stub_exchanger();
    let core = core_with(Arc::clone(&exchanger));
    let mut cookies = MemoryCookieStore::new();

    let params = start_sign_in(&core, &mut cookies).await;
    let mut redirector = RecordingRedirector::new();
    core.handle_oauth_callback(
        &mut cookies,
        &mut redirector,
        &OAuthCallback {
            code: Some("provider-code".to_owned()),
            state: Some(params["state"].clone()),
            error: None,
        },
    )
    .await
    .unwrap();
    assert!(core.get_session(&cookies).await.is_some());

    let mut redirector = RecordingRedirector::new();
    core.sign_out(&mut cookies, &mut redirector).await;
    assert!(core.get_session(&cookies).await.is_none());
    assert_eq!(redirector.last().unwrap().url, "/");
}
