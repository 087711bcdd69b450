//! Invalidation plan generation.
//!
//! Merges a batch of cache events into one plan. A reset anywhere in the
//! batch subsumes every tag invalidation in it.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use uuid::Uuid;

use super::events::{CacheEvent, EventKind};
use super::keys::Tag;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Tags whose entries go stale. Empty when `reset` is set.
    pub tags: BTreeSet<Tag>,
    /// Wipe the whole store.
    pub reset: bool,
    /// Endpoints whose success produced this plan.
    pub origins: BTreeSet<String>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(Tag::as_str).collect();
        write!(
            f,
            "InvalidationPlan {{ reset: {}, tags: [{}], origins: {} }}",
            self.reset,
            tags.join(", "),
            self.origins.len(),
        )
    }
}

impl InvalidationPlan {
    /// Merge events into a plan, ignoring duplicate event ids.
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids: HashSet<Uuid> = HashSet::new();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            match event.kind {
                EventKind::MutationSucceeded {
                    endpoint,
                    invalidates,
                    reset,
                } => {
                    plan.reset |= reset;
                    plan.tags.extend(invalidates);
                    plan.origins.insert(endpoint);
                }
                EventKind::TagsInvalidated { tags, origin } => {
                    plan.tags.extend(tags);
                    plan.origins.insert(origin);
                }
                EventKind::ResetRequested { origin } => {
                    plan.reset = true;
                    plan.origins.insert(origin);
                }
            }
        }

        if plan.reset {
            plan.tags.clear();
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        !self.reset && self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(endpoint: &str, tags: &[&str], reset: bool) -> CacheEvent {
        CacheEvent::new(
            EventKind::MutationSucceeded {
                endpoint: endpoint.to_string(),
                invalidates: tags.iter().map(|tag| Tag::from(*tag)).collect(),
                reset,
            },
            0,
        )
    }

    #[test]
    fn login_invalidates_session_tag() {
        let plan = InvalidationPlan::from_events(vec![mutation("login", &["session"], false)]);

        assert!(!plan.reset);
        assert!(plan.tags.contains(&Tag::from("session")));
        assert!(plan.origins.contains("login"));
    }

    #[test]
    fn tags_are_unioned() {
        let plan = InvalidationPlan::from_events(vec![
            mutation("login", &["session"], false),
            mutation("update-profile", &["session", "profile"], false),
        ]);

        assert_eq!(plan.tags.len(), 2);
        assert_eq!(plan.origins.len(), 2);
    }

    #[test]
    fn reset_subsumes_tags() {
        let plan = InvalidationPlan::from_events(vec![
            mutation("login", &["session"], false),
            mutation("logout", &[], true),
        ]);

        assert!(plan.reset);
        assert!(plan.tags.is_empty());
    }

    #[test]
    fn duplicate_events_are_ignored() {
        let event = mutation("login", &["session"], false);
        let plan = InvalidationPlan::from_events(vec![event.clone(), event]);

        assert_eq!(plan.tags.len(), 1);
    }

    #[test]
    fn empty_batch_yields_empty_plan() {
        let plan = InvalidationPlan::from_events(Vec::new());
        assert!(plan.is_empty());
        assert_eq!(
            plan.to_string(),
            "InvalidationPlan { reset: false, tags: [], origins: 0 }"
        );
    }
}
