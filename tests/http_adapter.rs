use std::time::Duration;

use authcache::application::auth::AuthClient;
use authcache::application::endpoints::EndpointRegistry;
use authcache::application::session::SessionState;
use authcache::application::transport::{
    HttpMethod, RequestAdapter, RequestDescriptor, RequestError,
};
use authcache::cache::CacheConfig;
use authcache::config::ApiSettings;
use authcache::infra::http::HttpAdapter;
use authcache_api_types::LoginRequest;
use httpmock::MockServer;
use serde_json::json;
use url::Url;

fn settings(server: &MockServer) -> ApiSettings {
    ApiSettings {
        base_url: Url::parse(&server.url("/api/v1")).expect("mock url"),
        timeout: Duration::from_secs(2),
        with_credentials: true,
    }
}

fn adapter(server: &MockServer) -> HttpAdapter {
    HttpAdapter::new(&settings(server)).expect("client builds")
}

#[tokio::test]
async fn success_envelope_is_returned() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/api/v1/users/me");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"success":true,"data":{"_id":"64f1","email":"ada@example.com"}}"#);
        })
        .await;

    let envelope = adapter(&server)
        .call(RequestDescriptor::new(HttpMethod::Get, "/users/me"))
        .await
        .expect("success");

    mock.assert_async().await;
    assert!(envelope.success);
    assert_eq!(envelope.data["email"], "ada@example.com");
}

#[tokio::test]
async fn json_body_is_sent() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("POST")
                .path("/api/v1/auth/login")
                .json_body(json!({"email": "ada@example.com", "password": "pw"}));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"success":true,"message":"Logged in"}"#);
        })
        .await;

    let envelope = adapter(&server)
        .call(
            RequestDescriptor::new(HttpMethod::Post, "/auth/login")
                .with_body(json!({"email": "ada@example.com", "password": "pw"})),
        )
        .await
        .expect("success");

    mock.assert_async().await;
    assert_eq!(envelope.message.as_deref(), Some("Logged in"));
}

#[tokio::test]
async fn non_2xx_carries_status_and_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("POST").path("/api/v1/auth/register");
            then.status(409)
                .header("content-type", "application/json")
                .body(r#"{"message":"Email already registered"}"#);
        })
        .await;

    let err = adapter(&server)
        .call(RequestDescriptor::new(HttpMethod::Post, "/auth/register"))
        .await
        .expect_err("conflict");

    assert_eq!(
        err,
        RequestError::server(409, Some("Email already registered".to_string()))
    );
}

#[tokio::test]
async fn non_json_error_body_has_no_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/api/v1/users/me");
            then.status(401).body("Unauthorized");
        })
        .await;

    let err = adapter(&server)
        .call(RequestDescriptor::new(HttpMethod::Get, "/users/me"))
        .await
        .expect_err("unauthorized");

    assert!(err.is_unauthorized());
    assert_eq!(err, RequestError::server(401, None));
}

#[tokio::test]
async fn unsuccessful_envelope_is_a_server_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("POST").path("/api/v1/auth/login");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"Invalid credentials"}"#);
        })
        .await;

    let err = adapter(&server)
        .call(RequestDescriptor::new(HttpMethod::Post, "/auth/login"))
        .await
        .expect_err("rejected");

    assert_eq!(
        err,
        RequestError::server(200, Some("Invalid credentials".to_string()))
    );
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let adapter = HttpAdapter::new(&ApiSettings {
        base_url: Url::parse("http://127.0.0.1:9/api/v1").expect("url"),
        timeout: Duration::from_millis(500),
        with_credentials: true,
    })
    .expect("client builds");

    let err = adapter
        .call(RequestDescriptor::new(HttpMethod::Get, "/users/me"))
        .await
        .expect_err("nothing listens on the discard port");

    assert!(matches!(err, RequestError::Network { .. }));
}

#[tokio::test]
async fn session_cookie_is_replayed_after_login() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method("POST").path("/api/v1/auth/login");
            then.status(200)
                .header("content-type", "application/json")
                .header("set-cookie", "token=abc123; Path=/; HttpOnly")
                .body(r#"{"success":true,"message":"Logged in"}"#);
        })
        .await;
    let me_with_cookie = server
        .mock_async(|when, then| {
            when.method("GET")
                .path("/api/v1/users/me")
                .header("cookie", "token=abc123");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"success":true,"data":{"_id":"64f1","email":"ada@example.com"}}"#);
        })
        .await;

    let client = AuthClient::new(
        CacheConfig::default(),
        std::sync::Arc::new(adapter(&server)),
        EndpointRegistry::auth().expect("valid tables"),
    );

    client
        .login(&LoginRequest {
            email: "ada@example.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .expect("login succeeds");
    let mut session = client.session();

    let state = session.resolved().await;
    login.assert_async().await;
    me_with_cookie.assert_async().await;
    assert!(matches!(state, SessionState::Authenticated(_)));
}

#[tokio::test]
async fn cookies_are_not_kept_without_credentials() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("POST").path("/api/v1/auth/login");
            then.status(200)
                .header("content-type", "application/json")
                .header("set-cookie", "token=abc123; Path=/; HttpOnly")
                .body(r#"{"success":true}"#);
        })
        .await;
    let me_without_cookie = server
        .mock_async(|when, then| {
            when.method("GET")
                .path("/api/v1/users/me")
                .header_missing("cookie");
            then.status(401)
                .header("content-type", "application/json")
                .body(r#"{"message":"Not authenticated"}"#);
        })
        .await;

    let adapter = HttpAdapter::new(&ApiSettings {
        with_credentials: false,
        ..settings(&server)
    })
    .expect("client builds");

    adapter
        .call(RequestDescriptor::new(HttpMethod::Post, "/auth/login"))
        .await
        .expect("login succeeds");
    let err = adapter
        .call(RequestDescriptor::new(HttpMethod::Get, "/users/me"))
        .await
        .expect_err("no cookie sent");

    me_without_cookie.assert_async().await;
    assert!(err.is_unauthorized());
}
