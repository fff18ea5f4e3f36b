//! The result of one engine turn.

use chrono::{DateTime, Utc};

use crate::message::OutboundMessage;
use crate::state::ConversationState;
use crate::types::CloseReason;

/// Why the engine's traversal loop halted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    /// Halted at a QUESTION node; the prompt (or retry text) was emitted.
    AwaitingInput,
    /// An END or HANDOFF node closed the conversation.
    Closed(CloseReason),
    /// A DELAY node suspended traversal; the runtime resumes at the instant.
    DelayScheduled(DateTime<Utc>),
}

/// One completed turn: the updated state, the messages to deliver, and why
/// traversal stopped.
///
/// A `Turn` derives deterministically from `(prior state, graph, input)`:
/// replaying the same inbound message against a fresh copy of the same prior
/// state yields an identical turn, message ids included.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub state: ConversationState,
    pub messages: Vec<OutboundMessage>,
    pub status: TurnStatus,
}

impl Turn {
    /// True if this turn closed the conversation.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.status, TurnStatus::Closed(_))
    }
}
