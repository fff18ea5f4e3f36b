//! SQLite-backed conversation state store.
//!
//! The full [`ConversationState`] is persisted as a JSON document, with a
//! few denormalized columns (`is_active`, `session_expires_at`,
//! `pending_resume_at`) so the sweeper's scans run as indexed queries
//! instead of deserializing every row.
//!
//! `save` replaces the whole row in one statement, which keeps the engine's
//! commit-on-success contract: a turn that fails never leaves a partial
//! write behind.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::types::ConversationKey;

use super::conversation::ConversationState;
use super::store::{StateStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    key TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    is_active INTEGER NOT NULL,
    session_expires_at TEXT NOT NULL,
    pending_resume_at TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_expiry
    ON conversations (is_active, session_expires_at);
CREATE INDEX IF NOT EXISTS idx_conversations_resume
    ON conversations (is_active, pending_resume_at);
"#;

/// Durable [`StateStore`] over a SQLite connection pool.
pub struct SqliteStateStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish()
    }
}

impl SqliteStateStore {
    /// Connect (or create) a SQLite database at `database_url` and apply the
    /// schema. Example URL: `"sqlite://chatflow.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("connect error: {e}"),
            })?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("schema bootstrap: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn row_to_state(row: &SqliteRow) -> Result<ConversationState, StoreError> {
        let state_json: String = row.get("state_json");
        serde_json::from_str(&state_json).map_err(|source| StoreError::Serde { source })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    #[instrument(skip(self), fields(key = %key), err)]
    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        let row: Option<SqliteRow> =
            sqlx::query("SELECT state_json FROM conversations WHERE key = ?1")
                .bind(key.encode())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| StoreError::Backend {
                    message: format!("select: {e}"),
                })?;
        row.as_ref().map(Self::row_to_state).transpose()
    }

    #[instrument(skip(self, state), fields(key = %state.key), err)]
    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let state_json =
            serde_json::to_string(state).map_err(|source| StoreError::Serde { source })?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO conversations (
                key, state_json, is_active, session_expires_at, pending_resume_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(state.key.encode())
        .bind(&state_json)
        .bind(i64::from(state.is_active))
        .bind(state.session_expires_at.to_rfc3339())
        .bind(state.pending_resume_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("upsert: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversations WHERE key = ?1")
            .bind(key.encode())
            .execute(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("delete: {e}"),
            })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn scan_expiring(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT state_json FROM conversations
            WHERE is_active = 1 AND session_expires_at <= ?1
            ORDER BY session_expires_at ASC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("expiry scan: {e}"),
        })?;
        rows.iter().map(Self::row_to_state).collect()
    }

    #[instrument(skip(self), err)]
    async fn scan_resumable(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConversationState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT state_json FROM conversations
            WHERE is_active = 1
              AND pending_resume_at IS NOT NULL
              AND pending_resume_at <= ?1
            ORDER BY pending_resume_at ASC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("resume scan: {e}"),
        })?;
        rows.iter().map(Self::row_to_state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteStateStore {
        SqliteStateStore::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    fn state(contact: &str, ttl_secs: u64) -> ConversationState {
        ConversationState::new(
            ConversationKey::new("t", contact, "f"),
            1,
            ttl_secs,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn round_trips_full_state() {
        let store = store().await;
        let mut s = state("c1", 3600);
        s.variables.insert("name".into(), "Ana".into());
        s.execution_path = vec!["start".into(), "greet".into()];
        s.turn_seq = 2;
        store.save(&s).await.unwrap();

        let loaded = store.load(&s.key).await.unwrap().unwrap();
        assert_eq!(loaded, s);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = store().await;
        let k = ConversationKey::new("t", "nobody", "f");
        assert_eq!(store.load(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_replaces_row() {
        let store = store().await;
        let mut s = state("c1", 3600);
        store.save(&s).await.unwrap();
        s.turn_seq = 7;
        store.save(&s).await.unwrap();

        let loaded = store.load(&s.key).await.unwrap().unwrap();
        assert_eq!(loaded.turn_seq, 7);
    }

    #[tokio::test]
    async fn expiry_scan_matches_in_memory_semantics() {
        let store = store().await;
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
    async fn resume_scan_honors_pending_delay() {
        let store = store().await;
        let mut due = state("due", 3600);
        due.pending_resume_at = Some(Utc::now() - Duration::seconds(10));
        let mut later = state("later", 3600);
        later.pending_resume_at = Some(Utc::now() + Duration::hours(1));
        for s in [&due, &later] {
            store.save(s).await.unwrap();
        }

        let ready = store.scan_resumable(Utc::now()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, due.key);
    }
}
