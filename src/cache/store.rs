//! Cache store.
//!
//! Holds one slot per [`CacheKey`]. Each slot owns a `watch` channel carrying
//! the current [`CacheEntry`] snapshot, the fetcher that produces it, the
//! subscriber count and the in-flight fetch, if any.
//!
//! All bookkeeping happens synchronously under a single mutex that is never
//! held across an await point. Network I/O runs in spawned tasks; every fetch
//! gets a fresh generation stamp and a completion is applied only if its stamp
//! still matches the slot's in-flight stamp.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use lru::LruCache;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::application::transport::RequestError;

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryStatus};
use super::keys::{CacheKey, Tag};
use super::lock::mutex_lock;
use super::registry::TagIndex;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "authcache_cache_hit_total";
const METRIC_CACHE_MISS: &str = "authcache_cache_miss_total";
const METRIC_CACHE_FETCH: &str = "authcache_cache_fetch_total";
const METRIC_CACHE_EVICT: &str = "authcache_cache_evict_total";
const METRIC_CACHE_INVALIDATE: &str = "authcache_cache_invalidate_total";
const METRIC_CACHE_STALE_DISCARD: &str = "authcache_cache_stale_discard_total";
const METRIC_FETCH_MS: &str = "authcache_fetch_ms";

/// Produces the value for one cache key.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Value, RequestError>;

    /// Tags attached to the entry this fetcher populates.
    fn provides(&self) -> BTreeSet<Tag> {
        BTreeSet::new()
    }
}

pub type SharedFetcher = Arc<dyn Fetcher>;

/// A response that arrived after its fetch was superseded.
#[derive(Debug, Error)]
#[error("discarded late response for `{key}` (generation {generation}, current {current:?})")]
pub(crate) struct StaleRead {
    key: CacheKey,
    generation: u64,
    current: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPolicy {
    /// Fetch when the entry never started or was invalidated.
    IfIdleOrStale,
    /// Fetch unless a fresh success is cached.
    UnlessFresh,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

struct Slot {
    tx: watch::Sender<CacheEntry>,
    fetcher: SharedFetcher,
    subscribers: usize,
    in_flight: Option<InFlight>,
    released_at: Option<Instant>,
}

impl Slot {
    fn is_evictable(&self) -> bool {
        self.subscribers == 0 && self.in_flight.is_none()
    }

    fn sync_subscribers(&self) {
        let count = self.subscribers;
        self.tx.send_if_modified(|entry| {
            entry.subscriber_count = count;
            false
        });
    }
}

struct StoreState {
    slots: LruCache<CacheKey, Slot>,
    tags: TagIndex,
    next_generation: u64,
    epoch: u64,
}

struct StoreInner {
    config: CacheConfig,
    state: Mutex<StoreState>,
}

/// Handle to the process-wide query cache.
///
/// Cheap to clone; every clone refers to the same store. Create one per
/// application session and call [`CacheStore::reset`] to start over.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(StoreState {
                    slots: LruCache::unbounded(),
                    tags: TagIndex::new(),
                    next_generation: 0,
                    epoch: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register interest in `key`.
    ///
    /// Starts a fetch when the entry is new or stale. The returned handle
    /// releases its interest when dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, key: CacheKey, fetcher: SharedFetcher) -> Subscription {
        self.acquire(key, fetcher, FetchPolicy::IfIdleOrStale)
    }

    /// Return a fresh cached success, or fetch and wait for the result.
    ///
    /// Concurrent callers for the same key share a single fetch. The caller
    /// counts as a subscriber while it waits.
    pub async fn get_or_fetch(&self, key: CacheKey, fetcher: SharedFetcher) -> CacheEntry {
        let mut subscription = self.acquire(key, fetcher, FetchPolicy::UnlessFresh);
        subscription.settled().await
    }

    /// Read the current snapshot without subscribing.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let state = self.lock("peek");
        state.slots.peek(key).map(|slot| slot.tx.borrow().clone())
    }

    /// Consistent view of every entry.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let state = self.lock("snapshot");
        state
            .slots
            .iter()
            .map(|(_, slot)| slot.tx.borrow().clone())
            .collect()
    }

    /// Every cached key, most recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        let state = self.lock("keys");
        state.slots.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock("len").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of full resets performed so far.
    pub fn epoch(&self) -> u64 {
        self.lock("epoch").epoch
    }

    /// Keys currently carrying `tag`.
    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        self.lock("keys_for_tag").tags.keys_for(tag)
    }

    /// Check the incremental tag index against one rebuilt from the entries.
    pub fn tag_index_is_consistent(&self) -> bool {
        let state = self.lock("tag_index_is_consistent");
        let declared: Vec<(CacheKey, BTreeSet<Tag>)> = state
            .slots
            .iter()
            .map(|(key, slot)| (key.clone(), slot.tx.borrow().tags.clone()))
            .collect();
        let rebuilt = TagIndex::rebuild(declared.iter().map(|(key, tags)| (key, tags)));
        rebuilt == state.tags
    }

    /// Mark the entries tagged with any of `tags` stale.
    ///
    /// Entries with subscribers or an in-flight fetch are re-fetched, the
    /// rest are evicted. Returns the re-fetched keys.
    pub fn invalidate_tags(&self, tags: &BTreeSet<Tag>) -> Vec<CacheKey> {
        let mut state = self.lock("invalidate_tags");
        self.invalidate_tags_locked(&mut state, tags)
    }

    /// Evict every entry and clear the tag index in one step.
    ///
    /// Keys that still have subscribers get a fresh entry on the same channel
    /// and are re-fetched; in-flight fetches are aborted and any late result
    /// is discarded. Returns the re-fetched keys.
    pub fn reset(&self) -> Vec<CacheKey> {
        let mut state = self.lock("reset");
        state.epoch += 1;

        // Oldest first, so re-inserted slots keep their relative recency.
        let order: Vec<CacheKey> = state.slots.iter().rev().map(|(key, _)| key.clone()).collect();
        let mut previous = std::mem::replace(&mut state.slots, LruCache::unbounded());
        state.tags.clear();

        let mut evicted = 0usize;
        let mut refetch = Vec::new();
        for key in order {
            let Some(mut slot) = previous.pop(&key) else {
                continue;
            };
            if let Some(in_flight) = slot.in_flight.take() {
                in_flight.abort.abort();
            }
            if slot.subscribers == 0 {
                evicted += 1;
                continue;
            }

            let tags = slot.fetcher.provides();
            let mut fresh = CacheEntry::idle(key.clone(), tags.clone());
            fresh.subscriber_count = slot.subscribers;
            slot.tx.send_if_modified(|entry| {
                *entry = fresh;
                false
            });
            slot.released_at = None;
            state.tags.attach(&key, &tags);
            state.slots.put(key.clone(), slot);
            refetch.push(key);
        }

        counter!(METRIC_CACHE_EVICT, "reason" => "reset").increment(evicted as u64);
        for key in &refetch {
            self.start_fetch(&mut state, key);
        }

        info!(
            epoch = state.epoch,
            evicted,
            refetched = refetch.len(),
            "Cache reset"
        );
        refetch
    }

    /// Wait until none of `keys` has a fetch in flight.
    ///
    /// Keys that disappear while waiting count as settled.
    pub async fn settle(&self, keys: &[CacheKey]) {
        let receivers: Vec<watch::Receiver<CacheEntry>> = {
            let state = self.lock("settle");
            keys.iter()
                .filter_map(|key| state.slots.peek(key).map(|slot| slot.tx.subscribe()))
                .collect()
        };

        join_all(receivers.into_iter().map(|mut rx| async move {
            let _ = rx.wait_for(|entry| !entry.is_fetching).await;
        }))
        .await;
    }

    /// Drop idle entries that have had no subscribers for `keep_unused`.
    ///
    /// Returns the number of evicted entries.
    pub fn prune_expired(&self) -> usize {
        let mut state = self.lock("prune_expired");
        self.prune_expired_locked(&mut state)
    }

    fn acquire(&self, key: CacheKey, fetcher: SharedFetcher, policy: FetchPolicy) -> Subscription {
        let rx = {
            let mut state = self.lock("acquire");
            self.prune_expired_locked(&mut state);

            if !state.slots.contains(&key) {
                let tags = fetcher.provides();
                let (tx, _) = watch::channel(CacheEntry::idle(key.clone(), tags.clone()));
                state.tags.attach(&key, &tags);
                state.slots.put(
                    key.clone(),
                    Slot {
                        tx,
                        fetcher,
                        subscribers: 0,
                        in_flight: None,
                        released_at: None,
                    },
                );
            }

            let (rx, needs_fetch) = match state.slots.get_mut(&key) {
                Some(slot) => {
                    slot.subscribers += 1;
                    slot.released_at = None;
                    slot.sync_subscribers();

                    let entry = slot.tx.borrow();
                    if entry.is_fresh_success() {
                        counter!(METRIC_CACHE_HIT).increment(1);
                        debug!(key = %key, "Cache hit");
                    } else {
                        counter!(METRIC_CACHE_MISS).increment(1);
                    }
                    let needs_fetch = !entry.is_fetching
                        && match policy {
                            FetchPolicy::IfIdleOrStale => {
                                entry.status == EntryStatus::Idle || entry.stale
                            }
                            FetchPolicy::UnlessFresh => !entry.is_fresh_success(),
                        };
                    drop(entry);
                    (slot.tx.subscribe(), needs_fetch)
                }
                None => {
                    // Unreachable in practice: the slot was inserted above
                    // under the same lock.
                    let (_, rx) = watch::channel(CacheEntry::idle(key.clone(), BTreeSet::new()));
                    (rx, false)
                }
            };

            if needs_fetch {
                self.start_fetch(&mut state, &key);
            }
            self.enforce_capacity(&mut state);
            rx
        };

        Subscription {
            store: self.clone(),
            key,
            rx,
        }
    }

    fn release(&self, key: &CacheKey) {
        let mut state = self.lock("release");
        let keep_unused = self.inner.config.keep_unused();

        let evict_now = match state.slots.peek_mut(key) {
            Some(slot) => {
                slot.subscribers = slot.subscribers.saturating_sub(1);
                slot.sync_subscribers();
                if slot.subscribers == 0 {
                    slot.released_at = Some(Instant::now());
                }
                keep_unused.is_zero() && slot.is_evictable()
            }
            None => false,
        };

        if evict_now {
            self.evict(&mut state, key, "unused");
        }
    }

    fn start_fetch(&self, state: &mut StoreState, key: &CacheKey) -> bool {
        state.next_generation += 1;
        let generation = state.next_generation;

        let Some(slot) = state.slots.peek_mut(key) else {
            return false;
        };

        if let Some(previous) = slot.in_flight.take() {
            previous.abort.abort();
            debug!(
                key = %key,
                superseded = previous.generation,
                generation,
                "Superseded in-flight fetch"
            );
        }

        slot.tx.send_modify(CacheEntry::begin_fetch);

        let fetcher = Arc::clone(&slot.fetcher);
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let started_at = Instant::now();
            let outcome = fetcher.fetch().await;
            histogram!(METRIC_FETCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

            if let Some(inner) = store.upgrade() {
                CacheStore { inner }.complete(&task_key, generation, outcome);
            }
        });

        slot.in_flight = Some(InFlight {
            generation,
            abort: task.abort_handle(),
        });

        counter!(METRIC_CACHE_FETCH).increment(1);
        debug!(key = %key, generation, "Fetch started");
        true
    }

    fn complete(&self, key: &CacheKey, generation: u64, outcome: Result<Value, RequestError>) {
        let mut state = self.lock("complete");
        let session_tag = self.inner.config.session_tag();

        let escalate = {
            let current = state
                .slots
                .peek(key)
                .and_then(|slot| slot.in_flight.as_ref().map(|f| f.generation));
            if current != Some(generation) {
                let stale = StaleRead {
                    key: key.clone(),
                    generation,
                    current,
                };
                counter!(METRIC_CACHE_STALE_DISCARD).increment(1);
                debug!(error = %stale, "Stale response discarded");
                return;
            }

            let Some(slot) = state.slots.peek_mut(key) else {
                return;
            };
            slot.in_flight = None;

            let unauthorized = matches!(&outcome, Err(error) if error.is_unauthorized());
            if let Err(error) = &outcome {
                debug!(key = %key, error = %error, "Fetch failed");
            }
            slot.tx.send_modify(|entry| entry.resolve(outcome));

            unauthorized
                && self.inner.config.escalate_unauthorized
                && !slot.tx.borrow().tags.contains(&session_tag)
        };

        if escalate {
            warn!(
                key = %key,
                session_tag = %session_tag,
                "Unauthorized response, invalidating session"
            );
            let tags = BTreeSet::from([session_tag]);
            self.invalidate_tags_locked(&mut state, &tags);
        }
    }

    fn invalidate_tags_locked(&self, state: &mut StoreState, tags: &BTreeSet<Tag>) -> Vec<CacheKey> {
        let keys: BTreeSet<CacheKey> = tags
            .iter()
            .flat_map(|tag| state.tags.keys_for(tag))
            .collect();
        self.invalidate_keys_locked(state, keys)
    }

    fn invalidate_keys_locked(
        &self,
        state: &mut StoreState,
        keys: BTreeSet<CacheKey>,
    ) -> Vec<CacheKey> {
        let mut refetch = Vec::new();
        let mut evict = Vec::new();

        for key in keys {
            let Some(slot) = state.slots.peek_mut(&key) else {
                continue;
            };
            counter!(METRIC_CACHE_INVALIDATE).increment(1);

            if slot.subscribers > 0 || slot.in_flight.is_some() {
                slot.tx.send_if_modified(|entry| {
                    entry.stale = true;
                    false
                });
                refetch.push(key);
            } else {
                evict.push(key);
            }
        }

        for key in &evict {
            self.evict(state, key, "invalidated");
        }
        for key in &refetch {
            self.start_fetch(state, key);
        }

        debug!(
            refetched = refetch.len(),
            evicted = evict.len(),
            "Invalidated cache entries"
        );
        refetch
    }

    fn prune_expired_locked(&self, state: &mut StoreState) -> usize {
        let keep_unused = self.inner.config.keep_unused();
        let now = Instant::now();
        let expired: Vec<CacheKey> = state
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.is_evictable()
                    && slot
                        .released_at
                        .map(|at| now.duration_since(at) >= keep_unused)
                        .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.evict(state, key, "expired");
        }
        expired.len()
    }

    fn enforce_capacity(&self, state: &mut StoreState) {
        let limit = self.inner.config.max_entries_non_zero().get();
        let overflow = state.slots.len().saturating_sub(limit);
        if overflow == 0 {
            return;
        }

        let victims: Vec<CacheKey> = state
            .slots
            .iter()
            .rev()
            .filter(|(_, slot)| slot.is_evictable())
            .map(|(key, _)| key.clone())
            .take(overflow)
            .collect();

        for key in &victims {
            self.evict(state, key, "capacity");
        }
    }

    fn evict(&self, state: &mut StoreState, key: &CacheKey, reason: &'static str) {
        if state.slots.pop(key).is_some() {
            state.tags.detach(key);
            counter!(METRIC_CACHE_EVICT, "reason" => reason).increment(1);
            debug!(key = %key, reason, "Cache entry evicted");
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, StoreState> {
        mutex_lock(&self.inner.state, SOURCE, op)
    }
}

/// Live interest in one cache key.
///
/// Dropping the subscription releases it.
pub struct Subscription {
    store: CacheStore,
    key: CacheKey,
    rx: watch::Receiver<CacheEntry>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The latest snapshot.
    pub fn current(&self) -> CacheEntry {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot.
    ///
    /// Returns `None` once the entry can no longer change.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until no fetch is in flight and return that snapshot.
    pub async fn settled(&mut self) -> CacheEntry {
        let settled = match self.rx.wait_for(|entry| !entry.is_fetching).await {
            Ok(entry) => Some(entry.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.rx.borrow().clone())
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}
