//! Per-contact conversation state.
//!
//! One [`ConversationState`] tracks a contact's position inside a flow:
//! cursor, collected variables, execution path, and session lifetime. It is
//! a plain serde-friendly value; all mutation discipline (locking, atomic
//! persistence) lives in the [`StateManager`](super::StateManager).

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{CloseReason, ConversationKey, FlowId, NodeId};

/// Persisted conversation position and variable set.
///
/// Invariants maintained by the engine and state manager:
/// - `variables` only grows or overwrites, never shrinks mid-conversation
/// - `execution_path` is append-only until the state closes
/// - `session_expires_at` only moves forward (see [`Self::touch`])
/// - once `is_active` is false the state is never resumed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Identity: tenant, contact, and the flow the contact entered through.
    pub key: ConversationKey,
    /// Version of the published flow this conversation is bound to.
    pub flow_version: u32,
    /// Flow the cursor currently lives in; differs from `key.flow_id` after
    /// a cross-flow JUMP.
    pub current_flow_id: FlowId,
    /// Cursor; `None` until the first turn locates START.
    pub current_node_id: Option<NodeId>,
    pub variables: FxHashMap<String, String>,
    pub execution_path: Vec<NodeId>,
    pub is_active: bool,
    /// Halted at a QUESTION node, waiting for the contact's answer.
    pub awaiting_input: bool,
    /// Set while a DELAY node is pending; cleared on resume or preemption.
    pub pending_resume_at: Option<DateTime<Utc>>,
    /// Monotone per-conversation turn counter; scopes deterministic message
    /// ids.
    pub turn_seq: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub session_expires_at: DateTime<Utc>,
    /// When the sweeper last sent a pre-expiry warning.
    pub last_warning_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create a fresh state for a first inbound message.
    #[must_use]
    pub fn new(key: ConversationKey, flow_version: u32, ttl_secs: u64, now: DateTime<Utc>) -> Self {
        let current_flow_id = key.flow_id.clone();
        Self {
            key,
            flow_version,
            current_flow_id,
            current_node_id: None,
            variables: FxHashMap::default(),
            execution_path: Vec::new(),
            is_active: true,
            awaiting_input: false,
            pending_resume_at: None,
            turn_seq: 0,
            last_message_at: None,
            session_expires_at: now + Duration::seconds(ttl_secs as i64),
            last_warning_at: None,
            close_reason: None,
            created_at: now,
        }
    }

    /// Record activity: stamp `last_message_at` and push the session expiry
    /// forward. The expiry is monotone — refreshing with an earlier `now`
    /// never pulls it backward.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl_secs: u64) {
        self.last_message_at = Some(now);
        let candidate = now + Duration::seconds(ttl_secs as i64);
        if candidate > self.session_expires_at {
            self.session_expires_at = candidate;
        }
    }

    /// Close the conversation with a terminal reason. Closed states are
    /// retained for history and never resumed.
    pub fn close(&mut self, reason: CloseReason) {
        self.is_active = false;
        self.awaiting_input = false;
        self.pending_resume_at = None;
        self.close_reason = Some(reason);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.is_active
    }

    /// True once `session_expires_at` has passed for an active state.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.session_expires_at <= now
    }
}
