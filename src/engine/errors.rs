//! Runtime errors surfaced by the execution engine.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{FlowId, NodeId};

/// Errors from [`Engine::advance`](super::Engine::advance).
///
/// Every variant aborts the current turn; the caller releases the
/// per-conversation lock without persisting, so the stored state is exactly
/// what it was before the turn began.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// A node's external call or internal step failed with no error edge to
    /// follow. The conversation stays open and resumable.
    #[error("execution failed at node {node}: {message}")]
    #[diagnostic(
        code(chatflow::engine::execution),
        help("the conversation remains open; the next inbound message retries from the halt point")
    )]
    Execution { node: NodeId, message: String },

    /// The step cap was exceeded, indicating an unguarded cycle in the flow.
    #[error("loop guard tripped for {key} after {cap} steps")]
    #[diagnostic(
        code(chatflow::engine::loop_guard),
        help("inspect the flow for a cycle with no exit condition")
    )]
    LoopGuardTripped { key: String, cap: u32 },

    /// Advance was attempted on a closed or expired conversation. This is a
    /// routing signal (restart policy), not an engine fault.
    #[error("conversation {key} is closed or expired")]
    #[diagnostic(code(chatflow::engine::session_expired))]
    SessionExpired { key: String },

    /// The cursor or a jump referenced a node missing from its graph.
    #[error("flow {flow_id} has no node {node}")]
    #[diagnostic(code(chatflow::engine::unknown_node))]
    UnknownNode { flow_id: FlowId, node: NodeId },

    /// A cross-flow jump named a flow the provider could not supply.
    #[error("flow {flow_id} is not available")]
    #[diagnostic(code(chatflow::engine::flow_unavailable))]
    FlowUnavailable { flow_id: FlowId },
}
