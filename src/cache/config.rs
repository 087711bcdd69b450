//! Cache configuration.
//!
//! Controls store capacity, unused-entry expiry and 401 escalation via the
//! `[cache]` table of `authcache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::Tag;

const DEFAULT_MAX_ENTRIES: usize = 256;
const DEFAULT_KEEP_UNUSED_SECS: u64 = 60;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
pub const DEFAULT_SESSION_TAG: &str = "session";

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries kept in the store.
    pub max_entries: usize,
    /// Seconds an entry without subscribers survives before it may be pruned.
    pub keep_unused_secs: u64,
    /// Invalidate the session tag when a non-session query answers 401.
    pub escalate_unauthorized: bool,
    /// Tag provided by the current-user query.
    pub session_tag: String,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            keep_unused_secs: DEFAULT_KEEP_UNUSED_SECS,
            escalate_unauthorized: true,
            session_tag: DEFAULT_SESSION_TAG.to_string(),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            keep_unused_secs: settings.keep_unused.as_secs(),
            escalate_unauthorized: settings.escalate_unauthorized,
            session_tag: DEFAULT_SESSION_TAG.to_string(),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn keep_unused(&self) -> Duration {
        Duration::from_secs(self.keep_unused_secs)
    }

    pub fn session_tag(&self) -> Tag {
        Tag::new(self.session_tag.clone())
    }

    /// Returns the batch limit, clamping to 1 if zero.
    pub fn consume_batch_limit_non_zero(&self) -> usize {
        self.consume_batch_limit.max(1)
    }
}
