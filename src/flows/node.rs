//! Node definitions for flow graphs.
//!
//! A flow is a directed graph of typed steps. Node behavior is modeled as a
//! closed tagged enum with one config payload per variant; the execution
//! engine dispatches with an exhaustive `match`, so adding a variant is a
//! compile-time checked change everywhere it matters.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, FlowId, NodeId};

use super::edges::ConditionBranch;

/// A single step in a flow graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the graph.
    pub id: NodeId,
    /// Type-specific behavior and configuration.
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// The closed set of node behaviors.
///
/// Serialized with a `"type"` discriminator so flow definitions read
/// naturally as authored data:
///
/// ```json
/// { "id": "greet", "type": "message", "text": "Hello {{name}}!" }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point. Exactly one per graph; emits nothing and advances
    /// immediately.
    Start,

    /// Interpolate and emit `text`, then advance.
    Message { text: String },

    /// First visit: emit the prompt and halt awaiting input. Second visit
    /// (with input): validate against `rule`, store into `variable`, advance.
    Question {
        prompt: String,
        variable: String,
        #[serde(default)]
        rule: AnswerRule,
        /// Emitted instead of `prompt` when an answer fails validation.
        #[serde(default)]
        retry_text: Option<String>,
    },

    /// Evaluate `branches` in declaration order against the variable set;
    /// advance along the first match, else along `default_edge`.
    Condition {
        branches: Vec<ConditionBranch>,
        default_edge: EdgeId,
    },

    /// Write a literal or interpolated value into `variable`, then advance.
    SetVariable { variable: String, value: String },

    /// Invoke an external collaborator under a bounded timeout. On success
    /// the result is stored into `output_variable` (when set) and traversal
    /// takes the `success`-labeled edge (or the sole unlabeled edge); on
    /// failure it takes the `error`-labeled edge if one exists.
    Action {
        action: String,
        #[serde(default)]
        params: serde_json::Value,
        #[serde(default)]
        output_variable: Option<String>,
        /// Overrides the engine's default action timeout.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Suspend traversal and resume after the interval. The engine persists
    /// a resume marker and returns; it never blocks a thread waiting.
    Delay { seconds: u64 },

    /// Emit the optional notice and close the conversation for automated
    /// traversal in favor of a human operator.
    Handoff {
        #[serde(default)]
        notice: Option<String>,
    },

    /// Redirect the cursor to `node`, in this flow or (when `flow` is set)
    /// in another published flow.
    Jump {
        #[serde(default)]
        flow: Option<FlowId>,
        node: NodeId,
    },

    /// Emit the optional final text and close the conversation.
    End {
        #[serde(default)]
        text: Option<String>,
    },
}

impl NodeKind {
    /// Stable lowercase name used in logs and events.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Message { .. } => "message",
            NodeKind::Question { .. } => "question",
            NodeKind::Condition { .. } => "condition",
            NodeKind::SetVariable { .. } => "set_variable",
            NodeKind::Action { .. } => "action",
            NodeKind::Delay { .. } => "delay",
            NodeKind::Handoff { .. } => "handoff",
            NodeKind::Jump { .. } => "jump",
            NodeKind::End { .. } => "end",
        }
    }

    /// Terminal nodes close the conversation and have no outgoing edges.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::End { .. } | NodeKind::Handoff { .. })
    }
}

/// Validation applied to a QUESTION answer before it is stored.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AnswerRule {
    /// Accept anything, including the empty string.
    #[default]
    Any,
    /// Reject empty or whitespace-only answers.
    NonEmpty,
    /// Accept only values that parse as a number.
    Numeric,
    /// Accept only one of the listed values (exact match after trimming).
    OneOf { options: Vec<String> },
}

impl AnswerRule {
    /// Check an inbound answer against this rule.
    #[must_use]
    pub fn accepts(&self, input: &str) -> bool {
        match self {
            AnswerRule::Any => true,
            AnswerRule::NonEmpty => !input.trim().is_empty(),
            AnswerRule::Numeric => input.trim().parse::<f64>().is_ok(),
            AnswerRule::OneOf { options } => {
                let trimmed = input.trim();
                options.iter().any(|o| o == trimmed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_rules() {
        assert!(AnswerRule::Any.accepts(""));
        assert!(!AnswerRule::NonEmpty.accepts("   "));
        assert!(AnswerRule::NonEmpty.accepts("x"));
        assert!(AnswerRule::Numeric.accepts(" 42.5 "));
        assert!(!AnswerRule::Numeric.accepts("two"));
        let rule = AnswerRule::OneOf {
            options: vec!["1".into(), "2".into()],
        };
        assert!(rule.accepts(" 2 "));
        assert!(!rule.accepts("3"));
    }

    #[test]
    fn node_serde_uses_type_tag() {
        let node = Node::new(
            "greet",
            NodeKind::Message {
                text: "Hello {{name}}!".into(),
            },
        );
        let json = serde_json::to_value(&node).expect("serialize");
        assert_eq!(json["type"], "message");
        assert_eq!(json["id"], "greet");
        let back: Node = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, node);
    }

    #[test]
    fn terminal_classification() {
        assert!(NodeKind::End { text: None }.is_terminal());
        assert!(NodeKind::Handoff { notice: None }.is_terminal());
        assert!(!NodeKind::Start.is_terminal());
        assert!(
            !NodeKind::Delay { seconds: 5 }.is_terminal(),
            "delay suspends, it does not terminate"
        );
    }
}
