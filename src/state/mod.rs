//! Conversation state: the persisted record of where each contact stands.
//!
//! [`ConversationState`] is the value, [`StateStore`] is the persistence
//! seam, and [`StateManager`] layers keyed locking and lifecycle rules on
//! top. The engine never touches a store directly.

pub mod conversation;
pub mod manager;
pub mod store;
#[cfg(feature = "sqlite")]
pub mod store_sqlite;

pub use conversation::ConversationState;
pub use manager::StateManager;
pub use store::{InMemoryStateStore, StateStore, StoreError};
#[cfg(feature = "sqlite")]
pub use store_sqlite::SqliteStateStore;
