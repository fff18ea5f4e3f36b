//! Conversation state manager: keyed access, locking, and lifecycle.
//!
//! The manager is the only component that talks to the [`StateStore`]. It
//! hands out per-conversation locks so that concurrent inbound messages for
//! the same contact serialize, while different conversations proceed in
//! parallel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::types::{CloseReason, ConversationKey};

use super::conversation::ConversationState;
use super::store::{StateStore, StoreError};

/// Serialized, store-backed access to conversation state.
pub struct StateManager {
    store: Arc<dyn StateStore>,
    locks: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl StateManager {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Acquire the per-conversation lock. Hold the guard for the whole turn:
    /// load, advance, dispatch, persist.
    pub async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.locks.lock().await;
            Arc::clone(table.entry(key.encode()).or_default())
        };
        entry.lock_owned().await
    }

    /// Load the state for `key`, or create a fresh one bound to
    /// `flow_version` with a `ttl_secs` session window.
    ///
    /// Closed states are returned as-is; restart policy belongs to the
    /// caller, which decides whether a new conversation begins.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get_or_create(
        &self,
        key: &ConversationKey,
        flow_version: u32,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, StoreError> {
        if let Some(existing) = self.store.load(key).await? {
            return Ok(existing);
        }
        let state = ConversationState::new(key.clone(), flow_version, ttl_secs, now);
        self.store.save(&state).await?;
        debug!(key = %key, flow_version, "created conversation state");
        Ok(state)
    }

    pub async fn load(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<ConversationState>, StoreError> {
        self.store.load(key).await
    }

    /// Persist the full state. Callers only invoke this after a turn
    /// succeeds; a failed turn leaves the stored state untouched.
    pub async fn persist(&self, state: &ConversationState) -> Result<(), StoreError> {
        self.store.save(state).await
    }

    /// Close and persist in one step.
    #[instrument(skip(self, state), fields(key = %state.key, ?reason))]
    pub async fn close(
        &self,
        state: &mut ConversationState,
        reason: CloseReason,
    ) -> Result<(), StoreError> {
        state.close(reason);
        self.store.save(state).await
    }

    /// Replace an expired or closed conversation with a fresh state under the
    /// same key. The old state must already be closed.
    pub async fn restart(
        &self,
        key: &ConversationKey,
        flow_version: u32,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, StoreError> {
        let state = ConversationState::new(key.clone(), flow_version, ttl_secs, now);
        self.store.save(&state).await?;
        debug!(key = %key, "restarted conversation");
        Ok(state)
    }

    /// Active states due for expiry at `cutoff`.
    pub async fn scan_expiring(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        self.store.scan_expiring(cutoff).await
    }

    /// Active states whose DELAY resume time has arrived.
    pub async fn scan_resumable(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        self.store.scan_resumable(cutoff).await
    }

    /// Drop lock entries for conversations that no longer exist. Called
    /// opportunistically by the sweeper so the table does not grow without
    /// bound.
    pub async fn prune_locks(&self) {
        let mut table = self.locks.lock().await;
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
