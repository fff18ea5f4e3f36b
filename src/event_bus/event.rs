use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CloseReason, FlowId, NodeId};

/// An operator-visible occurrence in a conversation's lifetime.
///
/// Events are observability, not control flow: nothing in the engine or
/// runtime depends on a sink consuming them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub at: DateTime<Utc>,
    /// Encoded conversation key (`tenant|contact|flow`).
    pub key: String,
    #[serde(flatten)]
    pub kind: ConversationEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEventKind {
    /// A turn completed and its state was persisted.
    TurnCompleted {
        flow_id: FlowId,
        node: Option<NodeId>,
        emitted: usize,
    },
    /// The loop guard aborted a turn; the conversation stays open.
    LoopGuardTripped { flow_id: FlowId, cap: u32 },
    /// A HANDOFF node closed the conversation for human takeover.
    Handoff { flow_id: FlowId },
    /// A DELAY node suspended the conversation until `resume_at`.
    DelayScheduled {
        flow_id: FlowId,
        resume_at: DateTime<Utc>,
    },
    /// The sweeper sent a pre-expiry warning.
    WarningSent { flow_id: FlowId },
    /// The conversation closed.
    Closed {
        flow_id: FlowId,
        reason: CloseReason,
        /// Set when expiry redirected the contact into another flow.
        redirected_to: Option<FlowId>,
    },
    /// The dispatcher gave up on a message.
    DeliveryFailed { message_id: String, reason: String },
}

impl ConversationEvent {
    #[must_use]
    pub fn now(key: impl Into<String>, kind: ConversationEventKind) -> Self {
        Self {
            at: Utc::now(),
            key: key.into(),
            kind,
        }
    }

    /// Short name used by log-oriented sinks.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ConversationEventKind::TurnCompleted { .. } => "turn_completed",
            ConversationEventKind::LoopGuardTripped { .. } => "loop_guard_tripped",
            ConversationEventKind::Handoff { .. } => "handoff",
            ConversationEventKind::DelayScheduled { .. } => "delay_scheduled",
            ConversationEventKind::WarningSent { .. } => "warning_sent",
            ConversationEventKind::Closed { .. } => "closed",
            ConversationEventKind::DeliveryFailed { .. } => "delivery_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_event_tag() {
        let event = ConversationEvent::now(
            "t|c|f",
            ConversationEventKind::LoopGuardTripped {
                flow_id: "f".into(),
                cap: 100,
            },
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "loop_guard_tripped");
        assert_eq!(json["key"], "t|c|f");
        let back: ConversationEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }
}
