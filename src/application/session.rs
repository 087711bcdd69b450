//! Session derivation.
//!
//! The session is never stored. It is recomputed from the current-user cache
//! entry on every read, so login, logout and registration only ever change
//! it by invalidating or resetting that entry.

use authcache_api_types::UserProfile;
use serde::Serialize;

use crate::cache::{CacheEntry, EntryStatus, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "user", rename_all = "snake_case")]
pub enum SessionState {
    /// The current-user query has not resolved yet.
    Unknown,
    Authenticated(UserProfile),
    Unauthenticated,
}

impl SessionState {
    pub fn derive(entry: Option<&CacheEntry>) -> Self {
        let Some(entry) = entry else {
            return SessionState::Unknown;
        };

        match entry.status {
            EntryStatus::Idle | EntryStatus::Loading => SessionState::Unknown,
            EntryStatus::Success => entry
                .data
                .as_ref()
                .and_then(UserProfile::from_payload)
                .map_or(SessionState::Unauthenticated, SessionState::Authenticated),
            EntryStatus::Error => SessionState::Unauthenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }
}

/// Live view of the session, backed by a subscription to the current-user
/// query. Dropping the view releases the subscription.
pub struct SessionView {
    subscription: Subscription,
}

impl SessionView {
    pub(crate) fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    pub fn state(&self) -> SessionState {
        SessionState::derive(Some(&self.subscription.current()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// The underlying current-user entry.
    pub fn entry(&self) -> CacheEntry {
        self.subscription.current()
    }

    /// Wait for the next update of the current-user entry.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.subscription
            .changed()
            .await
            .map(|entry| SessionState::derive(Some(&entry)))
    }

    /// Wait until no fetch is in flight and return the resulting state.
    pub async fn resolved(&mut self) -> SessionState {
        SessionState::derive(Some(&self.subscription.settled().await))
    }
}
