//! Core identifier types for the chatflow engine.
//!
//! These are the fundamental domain concepts: how flows, nodes, edges, and
//! conversations are addressed. Runtime infrastructure types (turn reports,
//! runner configuration) live in [`crate::runtime`].
//!
//! # Examples
//!
//! ```rust
//! use chatflow::types::{ConversationKey, CloseReason};
//!
//! let key = ConversationKey::new("acme", "+15550100", "onboarding");
//! assert_eq!(key.flow_id, "onboarding");
//! assert_eq!(CloseReason::Completed.as_str(), "completed");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a published flow graph.
pub type FlowId = String;

/// Identifier of a node, unique within its flow graph.
pub type NodeId = String;

/// Identifier of an edge, unique within its flow graph.
pub type EdgeId = String;

/// Opaque per-channel contact address (phone number, chat id, ...).
pub type ContactKey = String;

/// Tenant (account) identifier.
pub type TenantId = String;

/// Uniquely identifies one conversation: a contact advancing through a flow
/// on behalf of a tenant.
///
/// The key is fixed at conversation creation. A JUMP into another flow moves
/// the cursor ([`current_flow_id`](crate::state::ConversationState::current_flow_id))
/// but never re-keys the conversation; history stays attached to the flow the
/// contact entered through.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub tenant_id: TenantId,
    pub contact_key: ContactKey,
    pub flow_id: FlowId,
}

impl ConversationKey {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        contact_key: impl Into<ContactKey>,
        flow_id: impl Into<FlowId>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            contact_key: contact_key.into(),
            flow_id: flow_id.into(),
        }
    }

    /// Encode the key into its persisted string form (`tenant|contact|flow`).
    ///
    /// Used as the primary key column by persistent stores and as the lock
    /// table key. The components themselves must not contain `|`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.tenant_id, self.contact_key, self.flow_id)
    }

    /// Decode a persisted string form back into a key.
    ///
    /// Returns `None` if the input does not have exactly three non-empty
    /// components.
    pub fn decode(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '|');
        let tenant_id = parts.next()?.to_string();
        let contact_key = parts.next()?.to_string();
        let flow_id = parts.next()?.to_string();
        if tenant_id.is_empty() || contact_key.is_empty() || flow_id.is_empty() {
            return None;
        }
        Some(Self {
            tenant_id,
            contact_key,
            flow_id,
        })
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Terminal reason recorded when a conversation closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// An END node was reached.
    Completed,
    /// A HANDOFF node transferred the conversation to a human operator.
    Handoff,
    /// The session TTL elapsed and the sweeper closed the conversation.
    Expired,
    /// An explicit close outside normal traversal.
    Aborted,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::Handoff => "handoff",
            CloseReason::Expired => "expired",
            CloseReason::Aborted => "aborted",
        }
    }

    /// Decode a persisted reason string; unknown strings map to `Aborted`.
    pub fn decode(s: &str) -> Self {
        match s {
            "completed" => CloseReason::Completed,
            "handoff" => CloseReason::Handoff,
            "expired" => CloseReason::Expired,
            _ => CloseReason::Aborted,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
