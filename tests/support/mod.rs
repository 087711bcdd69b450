//! In-memory account API used by the integration tests.
//!
//! Models the server side of a cookie session: login and register open it,
//! logout closes it, `/users/me` answers 401 without one.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authcache::application::endpoints::{
    CURRENT_USER, EndpointRegistry, MUTATIONS, QUERIES, QueryEndpoint, SESSION_TAG,
};
use authcache::application::transport::{
    HttpMethod, RequestAdapter, RequestDescriptor, RequestError,
};
use authcache_api_types::Envelope;
use serde_json::{Value, json};
use tokio::sync::Notify;

pub const DRAFTS: &str = "drafts";
pub const TAG_TYPES: &[&str] = &[SESSION_TAG, "drafts"];

#[derive(Default)]
struct ServerState {
    user: Option<Value>,
    reject_logins: bool,
    calls: HashMap<String, usize>,
    gate: Option<Arc<Notify>>,
}

#[derive(Default)]
pub struct FakeAccountApi {
    state: Mutex<ServerState>,
}

impl FakeAccountApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logged_in_as(email: &str) -> Arc<Self> {
        let api = Self::new();
        api.open_session(email);
        api
    }

    pub fn open_session(&self, email: &str) {
        self.lock().user = Some(json!({"_id": "64f1c0ffee", "email": email, "name": "Ada"}));
    }

    /// Drop the session on the server side only, like an expired cookie.
    pub fn expire_session(&self) {
        self.lock().user = None;
    }

    pub fn reject_logins(&self) {
        self.lock().reject_logins = true;
    }

    /// Hold the next `/users/me` response until the returned handle is notified.
    pub fn gate_next_current_user(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().gate = Some(gate.clone());
        gate
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.lock().calls.get(path).copied().unwrap_or(0)
    }

    /// Yield until `path` has been called `count` times.
    pub async fn wait_for_calls(&self, path: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls_to(path) < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("expected call did not happen");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().expect("fake api state")
    }
}

fn unauthorized() -> RequestError {
    RequestError::server(401, Some("Not authorized".to_string()))
}

#[async_trait]
impl RequestAdapter for FakeAccountApi {
    async fn call(&self, request: RequestDescriptor) -> Result<Envelope, RequestError> {
        let (user, gate) = {
            let mut state = self.lock();
            *state.calls.entry(request.path.clone()).or_default() += 1;
            let gate = if request.path == "/users/me" {
                state.gate.take()
            } else {
                None
            };
            (state.user.clone(), gate)
        };

        match (request.method, request.path.as_str()) {
            (HttpMethod::Get, "/users/me") => {
                // The answer reflects the session at request time.
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                user.map(Envelope::ok).ok_or_else(unauthorized)
            }
            (HttpMethod::Get, "/drafts") => user
                .map(|_| Envelope::ok(json!([{"title": "draft"}])))
                .ok_or_else(unauthorized),
            (HttpMethod::Post, "/auth/login") | (HttpMethod::Post, "/auth/register") => {
                let email = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("email"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if self.lock().reject_logins {
                    return Err(RequestError::server(
                        401,
                        Some("Invalid credentials".to_string()),
                    ));
                }
                self.open_session(&email);
                Ok(Envelope::ok(json!({"email": email})).with_message("Welcome back"))
            }
            (HttpMethod::Post, "/auth/logout") => {
                self.expire_session();
                Ok(Envelope::ok(Value::Null).with_message("Logged out"))
            }
            _ => Err(RequestError::server(404, Some("Not found".to_string()))),
        }
    }
}

/// Account endpoints plus a protected `drafts` query.
pub fn endpoints_with_drafts() -> EndpointRegistry {
    let mut queries: Vec<QueryEndpoint> = QUERIES.to_vec();
    queries.push(QueryEndpoint {
        name: DRAFTS,
        method: HttpMethod::Get,
        path: "/drafts",
        provides: &["drafts"],
    });
    EndpointRegistry::new(TAG_TYPES, &queries, MUTATIONS, CURRENT_USER).expect("valid tables")
}
