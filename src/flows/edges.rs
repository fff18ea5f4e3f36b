//! Edges and routing predicates.
//!
//! Edges from CONDITION nodes are selected by predicate evaluation; all
//! other node types have at most one unlabeled outgoing edge, keeping
//! traversal deterministic. ACTION nodes may additionally carry edges
//! labeled `"success"` and `"error"`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, NodeId};

/// Edge label selecting the ACTION success path.
pub const LABEL_SUCCESS: &str = "success";
/// Edge label selecting the ACTION error path.
pub const LABEL_ERROR: &str = "error";

/// A directed connection between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    #[must_use]
    pub fn new(
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    #[must_use]
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}

/// One branch of a CONDITION node: a predicate and the edge taken when it
/// matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionBranch {
    pub when: Predicate,
    pub edge: EdgeId,
}

/// A simple data-authored comparison against the conversation's variables.
///
/// Ordered operators attempt numeric comparison first (both sides parsing as
/// `f64`) and fall back to lexicographic string order, so `"10" > "9"` holds
/// for numeric answers while non-numeric values still compare predictably.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub variable: String,
    pub op: CompareOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsSet,
    IsNotSet,
}

impl Predicate {
    #[must_use]
    pub fn new(variable: impl Into<String>, op: CompareOp, value: Option<String>) -> Self {
        Self {
            variable: variable.into(),
            op,
            value,
        }
    }

    /// Shorthand for an equality check.
    #[must_use]
    pub fn equals(variable: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(variable, CompareOp::Equals, Some(value.into()))
    }

    /// Evaluate against the variable set. An unset variable only matches
    /// `IsNotSet`; a missing comparison value never matches the binary
    /// operators.
    #[must_use]
    pub fn evaluate(&self, variables: &FxHashMap<String, String>) -> bool {
        let current = variables.get(&self.variable);
        match self.op {
            CompareOp::IsSet => current.is_some(),
            CompareOp::IsNotSet => current.is_none(),
            CompareOp::Equals => match (current, &self.value) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            CompareOp::NotEquals => match (current, &self.value) {
                (Some(actual), Some(expected)) => actual != expected,
                _ => false,
            },
            CompareOp::Contains => match (current, &self.value) {
                (Some(actual), Some(needle)) => actual.contains(needle.as_str()),
                _ => false,
            },
            CompareOp::GreaterThan => compare_ordered(current, self.value.as_deref(), |o| {
                o == std::cmp::Ordering::Greater
            }),
            CompareOp::LessThan => compare_ordered(current, self.value.as_deref(), |o| {
                o == std::cmp::Ordering::Less
            }),
        }
    }
}

fn compare_ordered(
    current: Option<&String>,
    expected: Option<&str>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let (Some(actual), Some(expected)) = (current, expected) else {
        return false;
    };
    let ordering = match (
        actual.trim().parse::<f64>(),
        expected.trim().parse::<f64>(),
    ) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(actual.as_str().cmp(expected)),
    };
    ordering.is_some_and(check)
}
