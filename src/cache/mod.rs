//! Query cache with tag-based invalidation.
//!
//! - **Store**: one entry per `(endpoint, args)` key, shared by every
//!   subscriber through a watch channel, with de-duplicated fetches.
//! - **Tag index**: tag → keys, used to resolve invalidations.
//! - **Invalidation engine**: turns mutation events into stale-marking,
//!   re-fetches, evictions or a full reset.
//!
//! ## Configuration
//!
//! Capacity and expiry come from the `[cache]` table of `authcache.toml`:
//!
//! ```toml
//! [cache]
//! max_entries = 256
//! keep_unused_secs = 60
//! escalate_unauthorized = true
//! ```

mod config;
mod engine;
mod entry;
mod events;
mod keys;
mod lock;
mod planner;
mod registry;
mod store;
mod trigger;

pub use config::{CacheConfig, DEFAULT_SESSION_TAG};
pub use engine::{Consumed, InvalidationEngine};
pub use entry::{CacheEntry, EntryStatus};
pub use events::{CacheEvent, EventKind, EventQueue, Sequence};
pub use keys::{CacheKey, Tag, canonical_json};
pub use planner::InvalidationPlan;
pub use registry::TagIndex;
pub use store::{CacheStore, Fetcher, SharedFetcher, Subscription};
pub use trigger::CacheTrigger;
