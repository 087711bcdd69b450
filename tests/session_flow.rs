mod support;

use std::sync::Arc;

use authcache::application::auth::AuthClient;
use authcache::application::endpoints::EndpointRegistry;
use authcache::application::error::AppError;
use authcache::application::session::SessionState;
use authcache::cache::{CacheConfig, CacheKey, EntryStatus};
use authcache_api_types::{LoginRequest, RegisterRequest};
use serde_json::Value;

use support::{DRAFTS, FakeAccountApi, endpoints_with_drafts};

const ME: &str = "/users/me";

fn client(api: &Arc<FakeAccountApi>) -> AuthClient {
    AuthClient::new(
        CacheConfig::default(),
        api.clone(),
        EndpointRegistry::auth().expect("valid tables"),
    )
}

fn login_request() -> LoginRequest {
    LoginRequest {
        email: "ada@example.com".to_string(),
        password: "correct horse".to_string(),
    }
}

#[tokio::test]
async fn login_and_logout_drive_the_session() {
    let api = FakeAccountApi::new();
    let client = client(&api);

    let mut session = client.session();
    assert_eq!(session.state(), SessionState::Unknown);
    assert_eq!(session.resolved().await, SessionState::Unauthenticated);

    client.login(&login_request()).await.expect("login succeeds");
    let state = session.state();
    assert!(state.is_authenticated());
    assert_eq!(
        state.user().and_then(|user| user.email.as_deref()),
        Some("ada@example.com")
    );

    let envelope = client.logout().await.expect("logout succeeds");
    assert_eq!(envelope.message.as_deref(), Some("Logged out"));
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(client.store().epoch(), 1);
    assert_eq!(api.calls_to(ME), 3);
}

#[tokio::test]
async fn register_refreshes_the_session() {
    let api = FakeAccountApi::new();
    let client = client(&api);
    let mut session = client.session();
    session.resolved().await;

    client
        .register(&RegisterRequest {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
        })
        .await
        .expect("register succeeds");

    assert!(session.is_authenticated());
}

#[tokio::test]
async fn session_does_not_revert_to_unknown_while_refetching() {
    let api = FakeAccountApi::new();
    let client = client(&api);
    let mut session = client.session();
    session.resolved().await;

    let request = login_request();
    let gate = api.gate_next_current_user();
    let observe = async {
        api.wait_for_calls(ME, 2).await;
        let during = session.state();
        gate.notify_one();
        during
    };

    let (login, during) = tokio::join!(client.login(&request), observe);
    login.expect("login succeeds");

    assert_eq!(during, SessionState::Unauthenticated);
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn failed_mutation_leaves_cache_untouched() {
    let api = FakeAccountApi::new();
    api.reject_logins();
    let client = client(&api);
    let mut session = client.session();
    session.resolved().await;
    let before = session.entry();

    let err = client
        .login(&login_request())
        .await
        .expect_err("login rejected");

    assert_eq!(
        err.request_error().and_then(|error| error.status()),
        Some(401)
    );
    assert_eq!(session.entry(), before);
    assert_eq!(api.calls_to(ME), 1);
    assert_eq!(session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn logout_discards_response_in_flight() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let client = client(&api);

    // The first current-user answer is captured while still logged in and held.
    let gate = api.gate_next_current_user();
    let session = client.session();
    api.wait_for_calls(ME, 1).await;

    client.logout().await.expect("logout succeeds");
    gate.notify_one();
    tokio::task::yield_now().await;

    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(client.store().epoch(), 1);
    assert_eq!(api.calls_to(ME), 2);
}

#[tokio::test]
async fn reset_evicts_unsubscribed_entries() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let client = AuthClient::new(CacheConfig::default(), api.clone(), endpoints_with_drafts());
    let mut session = client.session();
    session.resolved().await;

    client
        .query(DRAFTS, Value::Null)
        .await
        .expect("drafts while logged in");
    assert_eq!(client.store().len(), 2);

    client.logout().await.expect("logout succeeds");

    let keys: Vec<CacheKey> = client
        .store()
        .snapshot()
        .into_iter()
        .map(|entry| entry.key)
        .collect();
    assert_eq!(keys, vec![CacheKey::unit("current-user")]);
    assert!(client.store().tag_index_is_consistent());
}

#[tokio::test]
async fn concurrent_queries_share_one_request() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let client = AuthClient::new(CacheConfig::default(), api.clone(), endpoints_with_drafts());

    let (first, second) = tokio::join!(
        client.query(DRAFTS, Value::Null),
        client.query(DRAFTS, Value::Null)
    );

    assert_eq!(first.expect("first"), second.expect("second"));
    assert_eq!(api.calls_to("/drafts"), 1);
}

#[tokio::test]
async fn unauthorized_query_refetches_session() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let client = AuthClient::new(CacheConfig::default(), api.clone(), endpoints_with_drafts());
    let mut session = client.session();
    assert!(session.resolved().await.is_authenticated());

    api.expire_session();
    let err = client
        .query(DRAFTS, Value::Null)
        .await
        .expect_err("drafts need a session");
    assert!(matches!(err, AppError::Request(ref error) if error.is_unauthorized()));

    assert_eq!(session.resolved().await, SessionState::Unauthenticated);
    assert_eq!(api.calls_to(ME), 2);
}

#[tokio::test]
async fn escalation_can_be_disabled() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let config = CacheConfig {
        escalate_unauthorized: false,
        ..Default::default()
    };
    let client = AuthClient::new(config, api.clone(), endpoints_with_drafts());
    let mut session = client.session();
    session.resolved().await;

    api.expire_session();
    let entry = client
        .query_entry(DRAFTS, Value::Null)
        .await
        .expect("known endpoint");
    assert_eq!(entry.status, EntryStatus::Error);

    assert!(session.is_authenticated());
    assert_eq!(api.calls_to(ME), 1);
}

#[tokio::test]
async fn unknown_endpoints_are_rejected() {
    let api = FakeAccountApi::new();
    let client = client(&api);

    let err = client
        .mutate("delete-account", None)
        .await
        .expect_err("not declared");
    assert!(matches!(err, AppError::UnknownEndpoint(_)));
    assert!(client.query("nope", Value::Null).await.is_err());
}

#[tokio::test]
async fn peek_session_does_not_fetch() {
    let api = FakeAccountApi::logged_in_as("ada@example.com");
    let client = client(&api);

    assert_eq!(client.peek_session(), SessionState::Unknown);
    assert_eq!(api.calls_to(ME), 0);
}
