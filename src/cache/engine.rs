//! Invalidation engine.
//!
//! Drains pending events, merges them into one [`InvalidationPlan`] and
//! applies it to the store: a full reset, or stale-marking by tag.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::planner::InvalidationPlan;
use super::store::CacheStore;

const SOURCE: &str = "cache::engine";
const METRIC_CACHE_CONSUME_MS: &str = "authcache_cache_consume_ms";

/// Result of one consumption pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Consumed {
    pub events: usize,
    pub reset: bool,
    /// Keys re-fetched because they still had subscribers.
    pub refetched: Vec<CacheKey>,
}

pub struct InvalidationEngine {
    config: CacheConfig,
    store: CacheStore,
    queue: Arc<EventQueue>,
    /// Held from drain until the plan is applied, so a caller that finds
    /// the queue empty knows every earlier event has reached the store.
    consuming: Mutex<()>,
}

impl InvalidationEngine {
    pub fn new(config: CacheConfig, store: CacheStore, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            store,
            queue,
            consuming: Mutex::new(()),
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns `None` when the queue was empty.
    pub fn consume(&self) -> Option<Consumed> {
        let _consuming = mutex_lock(&self.consuming, SOURCE, "consume");
        self.consume_batch()
    }

    /// Consume until the queue is empty.
    pub fn consume_all(&self) -> Vec<Consumed> {
        let _consuming = mutex_lock(&self.consuming, SOURCE, "consume_all");
        std::iter::from_fn(|| self.consume_batch()).collect()
    }

    #[instrument(skip(self))]
    fn consume_batch(&self) -> Option<Consumed> {
        let started_at = Instant::now();
        let events = self
            .queue
            .drain(self.config.consume_batch_limit_non_zero());
        if events.is_empty() {
            return None;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = InvalidationPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache invalidation starting"
        );

        let refetched = if plan.reset {
            self.store.reset()
        } else if plan.tags.is_empty() {
            Vec::new()
        } else {
            self.store.invalidate_tags(&plan.tags)
        };

        info!(
            event_count,
            reset = plan.reset,
            refetched = refetched.len(),
            "Cache invalidation complete"
        );

        histogram!(
            METRIC_CACHE_CONSUME_MS,
            "mode" => if plan.reset { "reset" } else { "tags" }
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Some(Consumed {
            events: event_count,
            reset: plan.reset,
            refetched,
        })
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}
