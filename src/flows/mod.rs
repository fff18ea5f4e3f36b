//! Flow graph model: validated, versioned node/edge graphs.
//!
//! A flow is authored as data (or via [`FlowGraphBuilder`]) and published as
//! an immutable [`FlowGraph`]. The model is deliberately pure: traversal
//! queries like [`FlowGraph::resolve_next`] have no side effects, and all
//! runtime behavior lives in [`crate::engine`].

pub mod builder;
pub mod edges;
pub mod graph;
pub mod node;

pub use builder::FlowGraphBuilder;
pub use edges::{CompareOp, ConditionBranch, Edge, LABEL_ERROR, LABEL_SUCCESS, Predicate};
pub use graph::{FlowGraph, FlowSettings, NextStep, ValidationError};
pub use node::{AnswerRule, Node, NodeKind};
