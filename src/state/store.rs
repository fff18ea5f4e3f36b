//! Persistence trait for conversation state and the in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::ConversationKey;

use super::conversation::ConversationState;

/// Errors surfaced by state store backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("state backend failure: {message}")]
    #[diagnostic(
        code(chatflow::state::backend),
        help("check connectivity/permissions for the state backend")
    )]
    Backend { message: String },

    #[error("state serialization failed")]
    #[diagnostic(
        code(chatflow::state::serde),
        help("persisted state did not match the current schema")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

/// Durable storage for [`ConversationState`].
///
/// `save` must replace the full state atomically; partial writes after a
/// failed turn would violate the commit-on-success contract of the engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError>;

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError>;

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError>;

    /// Active states whose session expiry is at or before `cutoff`. Feeds the
    /// expiry sweeper.
    async fn scan_expiring(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError>;

    /// Active states with a pending DELAY resume at or before `cutoff`.
    async fn scan_resumable(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError>;
}

/// Volatile store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<FxHashMap<String, ConversationState>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of states currently held (active and closed).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.inner.read().await.get(&key.encode()).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(state.key.encode(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.inner.write().await.remove(&key.encode());
        Ok(())
    }

    async fn scan_expiring(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|s| s.is_active && s.session_expires_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn scan_resumable(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|s| {
                s.is_active
                    && s.pending_resume_at
                        .is_some_and(|resume_at| resume_at <= cutoff)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state(contact: &str, ttl_secs: u64) -> ConversationState {
        ConversationState::new(
            ConversationKey::new("t", contact, "f"),
            1,
            ttl_secs,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_load_delete() {
        let store = InMemoryStateStore::new();
        let s = state("c1", 3600);
        store.save(&s).await.unwrap();
        assert_eq!(store.load(&s.key).await.unwrap(), Some(s.clone()));

        store.delete(&s.key).await.unwrap();
        assert_eq!(store.load(&s.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_replaces_whole_state() {
        let store = InMemoryStateStore::new();
        let mut s = state("c1", 3600);
        store.save(&s).await.unwrap();

        s.variables.insert("name".into(), "Ana".into());
        s.turn_seq = 3;
        store.save(&s).await.unwrap();

        let loaded = store.load(&s.key).await.unwrap().unwrap();
        assert_eq!(loaded.turn_seq, 3);
        assert_eq!(loaded.variables.get("name").map(String::as_str), Some("Ana"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn scan_expiring_skips_closed_and_fresh() {
        let store = InMemoryStateStore::new();
        let stale = state("stale", 1);
        let fresh = state("fresh", 86400);
        let mut closed = state("closed", 1);
        closed.close(crate::types::CloseReason::Completed);
        for s in [&stale, &fresh, &closed] {
            store.save(s).await.unwrap();
        }

        let due = store
            .scan_expiring(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, stale.key);
    }

    #[tokio::test]
    async fn scan_resumable_filters_on_pending_delay() {
        let store = InMemoryStateStore::new();
        let mut due = state("due", 3600);
        due.pending_resume_at = Some(Utc::now() - Duration::seconds(5));
        let mut later = state("later", 3600);
        later.pending_resume_at = Some(Utc::now() + Duration::hours(1));
        let plain = state("plain", 3600);
        for s in [&due, &later, &plain] {
            store.save(s).await.unwrap();
        }

        let ready = store.scan_resumable(Utc::now()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, due.key);
    }
}
