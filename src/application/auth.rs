//! Account client: queries through the cache, mutations through the adapter
//! followed by tag invalidation or a full reset.

use std::sync::Arc;

use authcache_api_types::{Envelope, LoginRequest, RegisterRequest};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::{
    CacheConfig, CacheEntry, CacheKey, CacheStore, CacheTrigger, EntryStatus, EventQueue,
    InvalidationEngine, Subscription,
};
use crate::config::Settings;
use crate::infra::http::HttpAdapter;

use super::endpoints::{EndpointRegistry, LOGIN, LOGOUT, REGISTER};
use super::error::AppError;
use super::query::QueryFetcher;
use super::session::{SessionState, SessionView};
use super::transport::{RequestAdapter, RequestDescriptor};

pub struct AuthClient {
    store: CacheStore,
    trigger: CacheTrigger,
    adapter: Arc<dyn RequestAdapter>,
    endpoints: EndpointRegistry,
}

impl AuthClient {
    pub fn new(
        config: CacheConfig,
        adapter: Arc<dyn RequestAdapter>,
        endpoints: EndpointRegistry,
    ) -> Self {
        let store = CacheStore::new(config.clone());
        let queue = Arc::new(EventQueue::new());
        let engine = Arc::new(InvalidationEngine::new(config, store.clone(), queue.clone()));

        Self {
            store,
            trigger: CacheTrigger::new(queue, engine),
            adapter,
            endpoints,
        }
    }

    /// Wire the reqwest adapter and the account endpoints from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let adapter = HttpAdapter::new(&settings.api)?;
        let endpoints = EndpointRegistry::auth()?;
        Ok(Self::new(
            CacheConfig::from(&settings.cache),
            Arc::new(adapter),
            endpoints,
        ))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// Subscribe to the current-user query and project it into a session.
    pub fn session(&self) -> SessionView {
        let endpoint = *self.endpoints.session_query();
        let fetcher = QueryFetcher::new(Arc::clone(&self.adapter), endpoint, Value::Null);
        let key = fetcher.key();
        SessionView::new(self.store.subscribe(key, Arc::new(fetcher)))
    }

    /// Snapshot of the session without subscribing or fetching.
    pub fn peek_session(&self) -> SessionState {
        let endpoint = self.endpoints.session_query();
        let key = CacheKey::new(endpoint.name, &Value::Null);
        SessionState::derive(self.store.peek(&key).as_ref())
    }

    pub fn subscribe(&self, name: &str, args: Value) -> Result<Subscription, AppError> {
        let fetcher = self.fetcher(name, args)?;
        let key = fetcher.key();
        Ok(self.store.subscribe(key, Arc::new(fetcher)))
    }

    /// Run a query through the cache and return its payload.
    pub async fn query(&self, name: &str, args: Value) -> Result<Value, AppError> {
        let entry = self.query_entry(name, args).await?;
        match entry.status {
            EntryStatus::Success => Ok(entry.data.unwrap_or(Value::Null)),
            EntryStatus::Error => Err(entry
                .error
                .map(AppError::Request)
                .unwrap_or_else(|| AppError::unexpected("query failed without an error"))),
            EntryStatus::Idle | EntryStatus::Loading => Err(AppError::unexpected(format!(
                "query `{name}` did not settle"
            ))),
        }
    }

    pub async fn query_entry(&self, name: &str, args: Value) -> Result<CacheEntry, AppError> {
        let fetcher = self.fetcher(name, args)?;
        let key = fetcher.key();
        Ok(self.store.get_or_fetch(key, Arc::new(fetcher)).await)
    }

    /// Send a declared mutation.
    ///
    /// On success the mutation's tags are invalidated, or the cache is reset,
    /// and dependent re-fetches settle before this returns. Failures leave
    /// the cache untouched.
    #[instrument(skip(self, body))]
    pub async fn mutate(&self, name: &str, body: Option<Value>) -> Result<Envelope, AppError> {
        let endpoint = *self
            .endpoints
            .mutation(name)
            .ok_or_else(|| AppError::UnknownEndpoint(name.to_string()))?;

        let mut request = RequestDescriptor::new(endpoint.method, endpoint.path);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let envelope = self.adapter.call(request).await.map_err(|error| {
            warn!(endpoint = endpoint.name, error = %error, "Mutation failed");
            AppError::Request(error)
        })?;

        info!(
            endpoint = endpoint.name,
            reset = endpoint.resets_cache,
            "Mutation succeeded"
        );
        self.trigger
            .mutation_succeeded(
                endpoint.name,
                endpoint.invalidated_tags(),
                endpoint.resets_cache,
            )
            .await;

        Ok(envelope)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Envelope, AppError> {
        self.mutate(REGISTER, Some(to_body(request)?)).await
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<Envelope, AppError> {
        self.mutate(LOGIN, Some(to_body(request)?)).await
    }

    /// End the session. The cache is reset exactly once.
    pub async fn logout(&self) -> Result<Envelope, AppError> {
        self.mutate(LOGOUT, None).await
    }

    fn fetcher(&self, name: &str, args: Value) -> Result<QueryFetcher, AppError> {
        let endpoint = *self
            .endpoints
            .query(name)
            .ok_or_else(|| AppError::UnknownEndpoint(name.to_string()))?;
        Ok(QueryFetcher::new(Arc::clone(&self.adapter), endpoint, args))
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::invalid_input(err.to_string()))
}
