//! Cache trigger service.
//!
//! Publishes invalidation events, consumes them right away and waits for the
//! resulting re-fetches, so a mutation only returns once dependent queries
//! have settled.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::engine::InvalidationEngine;
use super::events::{EventKind, EventQueue};
use super::keys::{CacheKey, Tag};

pub struct CacheTrigger {
    queue: Arc<EventQueue>,
    engine: Arc<InvalidationEngine>,
}

impl CacheTrigger {
    pub fn new(queue: Arc<EventQueue>, engine: Arc<InvalidationEngine>) -> Self {
        Self { queue, engine }
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// With `consume_now`, waits until every key the event touched has
    /// settled, including keys whose re-fetch was started by a concurrent
    /// caller that drained this event first. Returns the keys re-fetched by
    /// this caller's own consumption.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) -> Vec<CacheKey> {
        let scope = Scope::of(&kind);
        self.queue.publish(kind);
        if !consume_now {
            return Vec::new();
        }

        let refetched: Vec<CacheKey> = self
            .engine
            .consume_all()
            .into_iter()
            .flat_map(|consumed| consumed.refetched)
            .collect();

        let store = self.engine.store();
        let mut pending: BTreeSet<CacheKey> = refetched.iter().cloned().collect();
        if scope.reset {
            pending.extend(store.keys());
        } else {
            for tag in &scope.tags {
                pending.extend(store.keys_for_tag(tag));
            }
        }

        if !pending.is_empty() {
            let pending: Vec<CacheKey> = pending.into_iter().collect();
            debug!(keys = pending.len(), "Waiting for re-fetches to settle");
            store.settle(&pending).await;
        }
        refetched
    }

    /// A mutation succeeded on the server.
    pub async fn mutation_succeeded(
        &self,
        endpoint: &str,
        invalidates: BTreeSet<Tag>,
        reset: bool,
    ) -> Vec<CacheKey> {
        self.trigger(
            EventKind::MutationSucceeded {
                endpoint: endpoint.to_string(),
                invalidates,
                reset,
            },
            true,
        )
        .await
    }

    pub async fn invalidate_tags(&self, tags: BTreeSet<Tag>, origin: &str) -> Vec<CacheKey> {
        self.trigger(
            EventKind::TagsInvalidated {
                tags,
                origin: origin.to_string(),
            },
            true,
        )
        .await
    }

    /// Wipe the cache and wait for subscribed keys to re-fetch.
    pub async fn reset(&self, origin: &str) -> Vec<CacheKey> {
        self.trigger(
            EventKind::ResetRequested {
                origin: origin.to_string(),
            },
            true,
        )
        .await
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}

/// Keys an event can touch, captured before the event is handed off.
struct Scope {
    tags: BTreeSet<Tag>,
    reset: bool,
}

impl Scope {
    fn of(kind: &EventKind) -> Self {
        let tags = match kind {
            EventKind::MutationSucceeded { invalidates, .. } => invalidates.clone(),
            EventKind::TagsInvalidated { tags, .. } => tags.clone(),
            EventKind::ResetRequested { .. } => BTreeSet::new(),
        };
        Self {
            tags,
            reset: kind.requests_reset(),
        }
    }
}
