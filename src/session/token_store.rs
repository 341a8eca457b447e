//! Token Store - the single source of truth for "is a user signed in"
//!
//! The store owns the current session token, the cached display profile and the
//! optional remembered sign-in identifier. Every read is synchronous so the HTTP
//! client can attach the token before dispatch and the route guard can decide at
//! render time.
//!
//! Storage failures never surface through this trait: an unreadable store is an
//! empty store.

use crate::models::{StoredSession, UserProfile};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// Capacity of the change-notification channel
pub const STORE_EVENT_CAPACITY: usize = 32;

/// Change notifications, the in-process stand-in for cross-tab storage events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    SessionSet,
    TokenUpdated,
    Cleared,
    IdentifierChanged,
}

pub trait TokenStore: Send + Sync {
    /// Store token and profile together, superseding any previous session
    fn set_session(&self, token: &str, profile: Option<UserProfile>);

    fn get_token(&self) -> Option<String>;

    fn get_cached_profile(&self) -> Option<UserProfile>;

    /// Replace the token and keep the cached profile (used after refresh)
    fn update_token(&self, token: &str);

    /// Remove token and profile. Idempotent; the remembered identifier survives.
    fn clear(&self);

    fn remember_identifier(&self, identifier: &str);

    fn remembered_identifier(&self) -> Option<String>;

    fn forget_identifier(&self);

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Apply `set_session` to a record
pub(crate) fn apply_set_session(
    record: &mut StoredSession,
    token: &str,
    profile: Option<UserProfile>,
) {
    record.token = Some(token.to_string());
    record.profile = profile;
}

/// Apply `clear` to a record; returns whether anything was removed
pub(crate) fn apply_clear(record: &mut StoredSession) -> bool {
    let had_session = record.token.is_some() || record.profile.is_some();
    record.token = None;
    record.profile = None;
    had_session
}

/// In-process token store
#[derive(Debug)]
pub struct MemoryTokenStore {
    record: RwLock<StoredSession>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_session(StoredSession::default())
    }

    /// Start from an existing record, e.g. a session restored by a test
    #[must_use]
    pub fn with_session(record: StoredSession) -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Self {
            record: RwLock::new(record),
            events,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&StoredSession) -> T) -> T {
        let guard = self.record.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn modify(&self, event: StoreEvent, f: impl FnOnce(&mut StoredSession) -> bool) {
        let changed = {
            let mut guard = self.record.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        };
        if changed {
            // No receivers is fine
            let _ = self.events.send(event);
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn set_session(&self, token: &str, profile: Option<UserProfile>) {
        self.modify(StoreEvent::SessionSet, |record| {
            apply_set_session(record, token, profile);
            true
        });
    }

    fn get_token(&self) -> Option<String> {
        self.read(|record| record.token.clone())
    }

    fn get_cached_profile(&self) -> Option<UserProfile> {
        self.read(|record| record.profile.clone())
    }

    fn update_token(&self, token: &str) {
        self.modify(StoreEvent::TokenUpdated, |record| {
            record.token = Some(token.to_string());
            true
        });
    }

    fn clear(&self) {
        self.modify(StoreEvent::Cleared, apply_clear);
    }

    fn remember_identifier(&self, identifier: &str) {
        self.modify(StoreEvent::IdentifierChanged, |record| {
            record.remembered_identifier = Some(identifier.to_string());
            true
        });
    }

    fn remembered_identifier(&self) -> Option<String> {
        self.read(|record| record.remembered_identifier.clone())
    }

    fn forget_identifier(&self) {
        self.modify(StoreEvent::IdentifierChanged, |record| {
            record.remembered_identifier.take().is_some()
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
