mod support;

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use git_credential_keeper::protocol::commands::CredentialCommand;
use git_credential_keeper::shared::error::{OAUTH2_ERROR, OAUTH2_STATE_MISMATCH};
use git_credential_keeper::store::{CredentialStore, MemoryCredentialStore, SecretStoreKey};
use git_credential_keeper::test_support::{
    fast_device_poll, ScriptedBrowser, ScriptedPrompt, TestContextBuilder,
};
use reqwest::Url;
use sha2::{Digest, Sha256};
use support::{response_pairs, run};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REQUEST: &str = "protocol=https\nhost=git.example.com\n\n";

fn oauth_builder(server: &MockServer) -> TestContextBuilder {
    TestContextBuilder::new()
        .env("GCM_OAUTH_CLIENTID", "keeper-test")
        .env("GCM_OAUTH_SCOPES", "read_repository write_repository")
        .env(
            "GCM_OAUTH_AUTHORIZE_ENDPOINT",
            &format!("{}/authorize", server.uri()),
        )
        .env("GCM_OAUTH_TOKEN_ENDPOINT", &format!("{}/token", server.uri()))
}

fn device_builder(server: &MockServer) -> TestContextBuilder {
    oauth_builder(server)
        .env("GCM_OAUTH_DEVICE_ENDPOINT", &format!("{}/device", server.uri()))
        .device_poll(fast_device_poll())
}

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .expect("url")
        .query_pairs()
        .into_owned()
        .collect()
}

fn form(body: &[u8]) -> HashMap<String, String> {
    let body = std::str::from_utf8(body).expect("utf8 body");
    query(&format!("http://form.invalid/?{body}"))
}

async fn token_requests(server: &MockServer, grant_type: &str) -> Vec<HashMap<String, String>> {
    server
        .received_requests()
        .await
        .expect("request recording")
        .iter()
        .filter(|r| r.url.path() == "/token")
        .map(|r| form(&r.body))
        .filter(|f| f.get("grant_type").map(String::as_str) == Some(grant_type))
        .collect()
}

async fn mount_code_exchange(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt-browser"
        })))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn browser_flow_sends_pkce_verifier_matching_the_challenge() {
    let server = MockServer::start().await;
    mount_code_exchange(&server, "browser-token").await;

    let mut challenges = Vec::new();
    for code in ["code-one", "code-two"] {
        let browser = ScriptedBrowser::approve(code);
        let ctx = oauth_builder(&server).browser(browser.clone()).build();
        let (result, out) = run(&ctx, CredentialCommand::Get, REQUEST).await;
        result.expect("get");
        let pairs = response_pairs(&out);
        assert!(pairs.contains(&("password".to_string(), "browser-token".to_string())));

        let opened = browser.opened_urls();
        assert_eq!(opened.len(), 1);
        let authorize = query(&opened[0]);
        assert_eq!(authorize.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(authorize.get("client_id").map(String::as_str), Some("keeper-test"));
        assert_eq!(
            authorize.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert_eq!(
            authorize.get("scope").map(String::as_str),
            Some("read_repository write_repository")
        );
        assert!(authorize["redirect_uri"].starts_with("http://127.0.0.1:"));
        assert!(!authorize["state"].is_empty());
        challenges.push(authorize["code_challenge"].clone());
    }

    let exchanges = token_requests(&server, "authorization_code").await;
    assert_eq!(exchanges.len(), 2);
    for (exchange, challenge) in exchanges.iter().zip(&challenges) {
        let verifier = &exchange["code_verifier"];
        assert!((43..=128).contains(&verifier.len()));
        assert_eq!(
            &URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
            challenge
        );
    }
    assert_eq!(exchanges[0]["code"], "code-one");
    assert_eq!(exchanges[1]["code"], "code-two");
    assert_ne!(exchanges[0]["code_verifier"], exchanges[1]["code_verifier"]);
    assert_ne!(challenges[0], challenges[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn browser_flow_persists_refresh_token() {
    let server = MockServer::start().await;
    mount_code_exchange(&server, "browser-token").await;

    let store = Arc::new(MemoryCredentialStore::new());
    let ctx = oauth_builder(&server)
        .store(store.clone())
        .browser(ScriptedBrowser::approve("code"))
        .build();
    let (result, _) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    result.expect("get");

    let refresh = store
        .get(&SecretStoreKey::new(
            "git",
            "https://oauth-refresh-token.git.example.com",
            Some("OAUTH_USER".into()),
        ))
        .expect("get")
        .expect("refresh token stored");
    assert_eq!(refresh.secret, "rt-browser");
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forged_state_is_rejected_before_code_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "must-not-be-issued"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let ctx = oauth_builder(&server)
        .store(store.clone())
        .browser(ScriptedBrowser::tampered_state("stolen-code"))
        .build();
    let (result, out) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    let err = result.expect_err("state mismatch");
    assert!(err.is(OAUTH2_STATE_MISMATCH), "{err}");
    assert!(out.is_empty());
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_consent_surfaces_oauth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = oauth_builder(&server)
        .browser(ScriptedBrowser::deny("access_denied"))
        .build();
    let (result, _) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    let err = result.expect_err("denied");
    assert!(err.is(OAUTH2_ERROR), "{err}");
    assert!(err.message().starts_with("access_denied"));
}

#[tokio::test]
async fn device_code_flow_polls_through_pending_and_slow_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device"))
        .and(body_string_contains("client_id=keeper-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "dev-123",
            "user_code": "WDJB-MJHT",
            "verification_uri": "https://git.example.com/device",
            "expires_in": 300
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-123"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "error": "authorization_pending" })),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-123"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "slow_down" })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "device-token",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let prompt = ScriptedPrompt::new();
    let ctx = device_builder(&server).prompt(prompt.clone()).build();
    let (result, out) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    result.expect("get");

    let pairs = response_pairs(&out);
    assert!(pairs.contains(&("password".to_string(), "device-token".to_string())));
    assert!(pairs.contains(&("username".to_string(), "OAUTH_USER".to_string())));
    assert_eq!(
        prompt.device_codes(),
        vec![(
            "WDJB-MJHT".to_string(),
            "https://git.example.com/device".to_string()
        )]
    );
    let polls = token_requests(&server, "urn:ietf:params:oauth:grant-type:device_code").await;
    assert_eq!(polls.len(), 4);
    assert!(polls.iter().all(|p| p["client_id"] == "keeper-test"));
}

#[tokio::test]
async fn expired_device_code_is_an_oauth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "dev-expired",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://git.example.com/device"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "expired_token" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let ctx = device_builder(&server).store(store.clone()).build();
    let (result, out) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    let err = result.expect_err("expired");
    assert!(err.is(OAUTH2_ERROR), "{err}");
    assert!(out.is_empty());
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn both_oauth_modes_are_offered_when_a_browser_exists() {
    let server = MockServer::start().await;
    mount_code_exchange(&server, "picked-browser").await;

    let prompt = ScriptedPrompt::new()
        .with_mode(git_credential_keeper::auth::modes::AuthMode::Browser);
    let ctx = device_builder(&server)
        .prompt(prompt.clone())
        .browser(ScriptedBrowser::approve("code"))
        .build();
    let (result, out) = run(&ctx, CredentialCommand::Get, REQUEST).await;
    result.expect("get");
    assert!(out.contains("password=picked-browser\n"));
    assert_eq!(prompt.offered_modes().len(), 1);
    assert_eq!(prompt.offered_modes()[0].len(), 2);
    assert!(prompt.device_codes().is_empty());
}
