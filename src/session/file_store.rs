//! Durable token store backed by a single JSON file
//!
//! The whole `StoredSession` record is rewritten on every change through a
//! temporary file and a rename, so token and profile always land together.
//! When a store key is configured the record is AES-256-GCM encrypted.
//!
//! Every read goes to disk, so a second process sharing the file (a second
//! "tab") sees sign-in and sign-out without coordination.

use crate::models::auth::StoreError;
use crate::models::{StoredSession, UserProfile};
use crate::session::token_store::{
    apply_clear, apply_set_session, StoreEvent, TokenStore, STORE_EVENT_CAPACITY,
};
use crate::utils::crypto::{decrypt_data, derive_encryption_key, encrypt_data, ENCRYPTION_KEY_SIZE};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

pub struct FileTokenStore {
    path: PathBuf,
    key: Option<[u8; ENCRYPTION_KEY_SIZE]>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for FileTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTokenStore")
            .field("path", &self.path)
            .field("encrypted", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl FileTokenStore {
    /// Create a store at `path`; `passphrase` enables encryption at rest
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<&str>) -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Self {
            path: path.into(),
            key: passphrase.map(|p| derive_encryption_key(p.as_bytes())),
            write_lock: Mutex::new(()),
            events,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, treating any failure as an empty store
    fn load(&self) -> StoredSession {
        match self.try_load() {
            Ok(record) => record,
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => StoredSession::default(),
            Err(e) => {
                warn!(
                    "⚠️ Session store at {} unreadable, treating as empty: {e}",
                    self.path.display()
                );
                StoredSession::default()
            }
        }
    }

    fn try_load(&self) -> Result<StoredSession, StoreError> {
        let content = fs::read_to_string(&self.path)?;
        match &self.key {
            Some(key) => decrypt_data(&content, key).map_err(|e| StoreError::Crypto(e.to_string())),
            None => Ok(serde_json::from_str(&content)?),
        }
    }

    fn try_save(&self, record: &StoredSession) -> Result<(), StoreError> {
        let content = match &self.key {
            Some(key) => encrypt_data(record, key).map_err(|e| StoreError::Crypto(e.to_string()))?,
            None => serde_json::to_string_pretty(record)?,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn modify(&self, event: StoreEvent, f: impl FnOnce(&mut StoredSession) -> bool) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.load();
        if !f(&mut record) {
            return;
        }
        match self.try_save(&record) {
            Ok(()) => {
                debug!("Session store updated ({event:?})");
                let _ = self.events.send(event);
            }
            Err(e) => warn!(
                "⚠️ Failed to write session store at {}: {e}",
                self.path.display()
            ),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn set_session(&self, token: &str, profile: Option<UserProfile>) {
        self.modify(StoreEvent::SessionSet, |record| {
            apply_set_session(record, token, profile);
            true
        });
    }

    fn get_token(&self) -> Option<String> {
        self.load().token
    }

    fn get_cached_profile(&self) -> Option<UserProfile> {
        self.load().profile
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
        self.load().remembered_identifier
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
