use serde::{Deserialize, Serialize};

use crate::types::ConversationKey;

/// An outbound message produced by the execution engine for delivery to a
/// contact.
///
/// Every message carries a logical id that is **deterministic for a given
/// turn**: replaying the same inbound message against the same prior state
/// produces byte-identical ids, which is what lets the dispatcher suppress
/// duplicate sends after a crash-retry.
///
/// # Examples
///
/// ```
/// use chatflow::message::{MessageKind, OutboundMessage};
/// use chatflow::types::ConversationKey;
///
/// let key = ConversationKey::new("acme", "+15550100", "onboarding");
/// let msg = OutboundMessage::in_turn(&key, 3, 0, MessageKind::Text, "Hello!");
/// assert_eq!(msg.id, "acme|+15550100|onboarding#3.0");
/// assert_eq!(msg.text, "Hello!");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Logical message id, unique per conversation and stable across replays.
    pub id: String,
    /// What produced this message; transports may map kinds to channel
    /// features (e.g. a handoff notice routed to an agent inbox).
    pub kind: MessageKind,
    /// Rendered text, already interpolated.
    pub text: String,
}

/// Classifies an outbound message by the node or runtime event that emitted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain MESSAGE node emission.
    Text,
    /// QUESTION node prompt (the conversation halts awaiting input).
    Prompt,
    /// END node final text.
    Final,
    /// HANDOFF node notice.
    HandoffNotice,
    /// Loop-guard apology emitted when a turn is aborted.
    Apology,
    /// Pre-expiry warning from the sweeper.
    ExpiryWarning,
    /// Expiration notice from the sweeper.
    Expiration,
}

impl OutboundMessage {
    /// Build a message with an explicit id.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }

    /// Build a message with a deterministic turn-scoped id.
    ///
    /// The id is `<key>#<turn_seq>.<index>`: the conversation key's encoded
    /// form, the turn sequence number at the start of the turn, and the
    /// message's position within the turn.
    #[must_use]
    pub fn in_turn(
        key: &ConversationKey,
        turn_seq: u64,
        index: usize,
        kind: MessageKind,
        text: impl Into<String>,
    ) -> Self {
        Self::new(format!("{}#{turn_seq}.{index}", key.encode()), kind, text)
    }

    /// Returns true if this message has the given kind.
    #[must_use]
    pub fn has_kind(&self, kind: MessageKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new("t1", "c1", "f1")
    }

    #[test]
    fn turn_scoped_ids_are_deterministic() {
        let a = OutboundMessage::in_turn(&key(), 7, 2, MessageKind::Text, "hi");
        let b = OutboundMessage::in_turn(&key(), 7, 2, MessageKind::Text, "hi");
        assert_eq!(a, b);
        assert_eq!(a.id, "t1|c1|f1#7.2");
    }

    #[test]
    fn ids_differ_across_turns_and_positions() {
        let a = OutboundMessage::in_turn(&key(), 1, 0, MessageKind::Text, "x");
        let b = OutboundMessage::in_turn(&key(), 2, 0, MessageKind::Text, "x");
        let c = OutboundMessage::in_turn(&key(), 1, 1, MessageKind::Text, "x");
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn kind_checking() {
        let msg = OutboundMessage::in_turn(&key(), 1, 0, MessageKind::Prompt, "name?");
        assert!(msg.has_kind(MessageKind::Prompt));
        assert!(!msg.has_kind(MessageKind::Text));
    }

    #[test]
    fn serialization_round_trip() {
        let original = OutboundMessage::in_turn(&key(), 4, 1, MessageKind::Final, "bye");
        let json = serde_json::to_string(&original).expect("serialize");
        let parsed: OutboundMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(original, parsed);
    }
}
