//! ACTION node collaborators.
//!
//! External calls are modeled as [`ActionHandler`] implementations looked up
//! by name in an [`ActionRegistry`]. The engine bounds every invocation with
//! `tokio::time::timeout`, so a slow collaborator can delay a turn by at
//! most the configured budget before the node's error path is taken.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Failure reported by an action collaborator.
#[derive(Debug, Error, Diagnostic)]
#[error("action failed: {message}")]
#[diagnostic(code(chatflow::engine::action))]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An external collaborator invocable from an ACTION node.
///
/// `params` is the node's authored configuration; `variables` is a read-only
/// snapshot of the conversation's variable set. The returned value is stored
/// into the node's output variable when one is configured (strings are
/// stored verbatim, other values as their JSON rendering).
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(
        &self,
        params: &serde_json::Value,
        variables: &FxHashMap<String, String>,
    ) -> Result<serde_json::Value, ActionError>;
}

/// Name-keyed lookup of registered action handlers.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: FxHashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
