//! Invalidation events.
//!
//! Mutations publish events here; the invalidation engine drains them and
//! turns a batch into one plan.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use super::keys::Tag;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "authcache_cache_event_queue_len";

/// Monotonic sequence number within this process.
pub type Sequence = u64;

#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub sequence: Sequence,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, sequence: Sequence) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A mutation completed successfully.
    MutationSucceeded {
        endpoint: String,
        invalidates: BTreeSet<Tag>,
        /// The mutation ends the session and wipes the cache.
        reset: bool,
    },
    /// Explicit tag invalidation.
    TagsInvalidated {
        tags: BTreeSet<Tag>,
        origin: String,
    },
    /// Explicit full reset.
    ResetRequested { origin: String },
}

impl EventKind {
    pub fn requests_reset(&self) -> bool {
        match self {
            EventKind::MutationSucceeded { reset, .. } => *reset,
            EventKind::TagsInvalidated { .. } => false,
            EventKind::ResetRequested { .. } => true,
        }
    }
}

/// FIFO queue of pending invalidation events.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    sequence: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_sequence(&self) -> Sequence {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue an event and return its id.
    pub fn publish(&self, kind: EventKind) -> Uuid {
        let event = CacheEvent::new(kind, self.next_sequence());
        let id = event.id;

        info!(
            event_id = %event.id,
            event_sequence = event.sequence,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        id
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
