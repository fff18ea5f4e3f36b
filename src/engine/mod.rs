//! Execution engine: deterministic flow traversal.
//!
//! [`Engine::advance`] takes a persisted [`ConversationState`](crate::state::ConversationState),
//! the published graph for its current flow, and an optional inbound text,
//! and produces a [`Turn`]: the updated state, the outbound messages, and
//! the halt reason. The engine mutates nothing outside the turn; committing
//! the result is the runtime's job.

pub mod actions;
pub mod core;
pub mod errors;
pub mod outcome;
pub mod provider;

pub use actions::{ActionError, ActionHandler, ActionRegistry};
pub use core::{Engine, EngineConfig};
pub use errors::EngineError;
pub use outcome::{Turn, TurnStatus};
pub use provider::{FlowProvider, InMemoryFlowProvider};
