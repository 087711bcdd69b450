//! Cache entry snapshots.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::application::transport::RequestError;

use super::keys::{CacheKey, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Created but no fetch has started yet.
    Idle,
    /// First fetch in flight, nothing resolved so far.
    Loading,
    Success,
    Error,
}

impl EntryStatus {
    /// True once at least one fetch has resolved.
    pub fn is_resolved(self) -> bool {
        matches!(self, EntryStatus::Success | EntryStatus::Error)
    }
}

/// Immutable snapshot of one cached query.
///
/// The store replaces snapshots wholesale; callers always hold clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: EntryStatus,
    pub data: Option<Value>,
    pub error: Option<RequestError>,
    pub tags: BTreeSet<Tag>,
    pub subscriber_count: usize,
    /// A fetch for this key is in flight.
    pub is_fetching: bool,
    /// Invalidated since the last successful fetch.
    pub stale: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

impl CacheEntry {
    pub(crate) fn idle(key: CacheKey, tags: BTreeSet<Tag>) -> Self {
        Self {
            key,
            status: EntryStatus::Idle,
            data: None,
            error: None,
            tags,
            subscriber_count: 0,
            is_fetching: false,
            stale: false,
            last_updated: None,
        }
    }

    /// A fresh, not stale success that can be served without a fetch.
    pub fn is_fresh_success(&self) -> bool {
        self.status == EntryStatus::Success && !self.stale && !self.is_fetching
    }

    pub(crate) fn begin_fetch(&mut self) {
        self.is_fetching = true;
        if !self.status.is_resolved() {
            self.status = EntryStatus::Loading;
        }
    }

    pub(crate) fn resolve(&mut self, outcome: Result<Value, RequestError>) {
        match outcome {
            Ok(data) => {
                self.status = EntryStatus::Success;
                self.data = Some(data);
                self.error = None;
            }
            Err(error) => {
                self.status = EntryStatus::Error;
                self.error = Some(error);
            }
        }
        self.is_fetching = false;
        self.stale = false;
        self.last_updated = Some(OffsetDateTime::now_utc());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry() -> CacheEntry {
        CacheEntry::idle(CacheKey::unit("current-user"), BTreeSet::new())
    }

    #[test]
    fn first_fetch_reports_loading() {
        let mut entry = entry();
        entry.begin_fetch();
        assert_eq!(entry.status, EntryStatus::Loading);
        assert!(entry.is_fetching);
    }

    #[test]
    fn refetch_keeps_previous_result() {
        let mut entry = entry();
        entry.begin_fetch();
        entry.resolve(Ok(json!({"id": "1"})));
        entry.stale = true;

        entry.begin_fetch();
        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(entry.data, Some(json!({"id": "1"})));
        assert!(!entry.is_fresh_success());
    }

    #[test]
    fn error_keeps_last_data() {
        let mut entry = entry();
        entry.resolve(Ok(json!(1)));
        entry.resolve(Err(RequestError::server(401, None)));

        assert_eq!(entry.status, EntryStatus::Error);
        assert_eq!(entry.data, Some(json!(1)));
        assert!(entry.error.is_some());
        assert!(entry.last_updated.is_some());
    }
}
