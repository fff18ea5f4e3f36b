//! The validated, versioned flow graph and its pure traversal queries.
//!
//! Nodes and edges live in flat, id-addressed collections rather than
//! mutually-referencing objects, so cyclic flows (menus that loop back) are
//! plain data with no ownership hazard. A [`FlowGraph`] is immutable once
//! published; editing a flow produces a new version and conversations
//! mid-flight stay on the version bound to their state.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EdgeId, FlowId, NodeId};

use super::edges::{Edge, LABEL_ERROR, LABEL_SUCCESS};
use super::node::{Node, NodeKind};

/// Structural problems detected at publish time (and, defensively, by the
/// pure traversal queries when handed an unvalidated graph).
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("flow {flow_id} has no start node")]
    #[diagnostic(
        code(chatflow::flows::no_start),
        help("Every flow needs exactly one node of type `start`.")
    )]
    NoStart { flow_id: FlowId },

    #[error("flow {flow_id} has {count} start nodes")]
    #[diagnostic(code(chatflow::flows::multiple_starts))]
    MultipleStarts { flow_id: FlowId, count: usize },

    #[error("duplicate node id: {node}")]
    #[diagnostic(code(chatflow::flows::duplicate_node))]
    DuplicateNode { node: NodeId },

    #[error("duplicate edge id: {edge}")]
    #[diagnostic(code(chatflow::flows::duplicate_edge))]
    DuplicateEdge { edge: EdgeId },

    #[error("edge {edge} references unknown node {node}")]
    #[diagnostic(
        code(chatflow::flows::dangling_edge),
        help("Both endpoints of every edge must name an existing node id.")
    )]
    DanglingEdge { edge: EdgeId, node: NodeId },

    #[error("node {node} has no outgoing edge")]
    #[diagnostic(
        code(chatflow::flows::dead_end),
        help("Every non-terminal node needs an outgoing edge.")
    )]
    DeadEnd { node: NodeId },

    #[error("node {node} has {count} unlabeled outgoing edges")]
    #[diagnostic(
        code(chatflow::flows::ambiguous_edges),
        help("Only condition nodes may branch; other nodes take a single edge.")
    )]
    AmbiguousEdges { node: NodeId, count: usize },

    #[error("condition node {node} references unknown edge {edge}")]
    #[diagnostic(code(chatflow::flows::unknown_branch_edge))]
    UnknownBranchEdge { node: NodeId, edge: EdgeId },

    #[error("condition node {node} branch edge {edge} does not originate at it")]
    #[diagnostic(code(chatflow::flows::foreign_branch_edge))]
    ForeignBranchEdge { node: NodeId, edge: EdgeId },

    #[error("question node {node} has an empty variable name")]
    #[diagnostic(code(chatflow::flows::empty_variable))]
    EmptyVariable { node: NodeId },

    #[error("jump node {node} targets unknown node {target}")]
    #[diagnostic(
        code(chatflow::flows::unknown_jump_target),
        help("Same-flow jump targets must exist; cross-flow targets are resolved at runtime.")
    )]
    UnknownJumpTarget { node: NodeId, target: NodeId },

    #[error("unknown node: {node}")]
    #[diagnostic(code(chatflow::flows::unknown_node))]
    UnknownNode { node: NodeId },
}

/// Per-flow operator settings consumed by the engine, dispatcher, and
/// sweeper. All fields have serde defaults so authored flows only state what
/// they change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Inactivity TTL in seconds before the sweeper expires a session;
    /// `None` uses the runtime default (24h).
    pub session_ttl_secs: Option<u64>,
    /// Seconds before full expiry at which a warning is sent; `None`
    /// disables warnings.
    pub warning_threshold_secs: Option<u64>,
    pub warning_text: Option<String>,
    pub expiration_text: Option<String>,
    /// Flow to start the contact in after expiration.
    pub redirect_flow: Option<FlowId>,
    /// Overrides the engine's loop-guard step cap for this flow.
    pub step_cap: Option<u32>,
    /// Per-contact outbound rate ceiling (messages per minute).
    pub rate_ceiling_per_minute: Option<u32>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: None,
            warning_threshold_secs: None,
            warning_text: None,
            expiration_text: None,
            redirect_flow: None,
            step_cap: None,
            rate_ceiling_per_minute: None,
        }
    }
}

/// Where traversal goes after a node executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Continue at the named node.
    Node(NodeId),
    /// The node was terminal (END or HANDOFF); traversal stops.
    Terminal,
}

/// A published, immutable conversation flow.
///
/// Construct through [`FlowGraphBuilder`](super::FlowGraphBuilder) or
/// deserialize from authored data and call [`validate`](Self::validate)
/// before use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub flow_id: FlowId,
    pub version: u32,
    pub nodes: FxHashMap<NodeId, Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub settings: FlowSettings,
}

impl FlowGraph {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The unique START node. Only meaningful on validated graphs.
    pub fn start_node(&self) -> Result<&Node, ValidationError> {
        let mut starts = self
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Start));
        match (starts.next(), starts.next()) {
            (Some(node), None) => Ok(node),
            (None, _) => Err(ValidationError::NoStart {
                flow_id: self.flow_id.clone(),
            }),
            (Some(_), Some(_)) => Err(ValidationError::MultipleStarts {
                flow_id: self.flow_id.clone(),
                count: self
                    .nodes
                    .values()
                    .filter(|n| matches!(n.kind, NodeKind::Start))
                    .count(),
            }),
        }
    }

    /// All edges originating at `node`, in declaration order.
    pub fn outgoing(&self, node: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == node)
    }

    fn edge_by_id(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// The single deterministic successor of a non-branching node: the first
    /// unlabeled outgoing edge, or the sole outgoing edge of any label.
    fn default_target(&self, node: &str) -> Option<&NodeId> {
        let mut outgoing = self.outgoing(node);
        let first = outgoing.next()?;
        if first.label.is_none() {
            return Some(&first.target);
        }
        match outgoing.find(|e| e.label.is_none()) {
            Some(unlabeled) => Some(&unlabeled.target),
            None if self.outgoing(node).nth(1).is_none() => Some(&first.target),
            None => None,
        }
    }

    fn labeled_target(&self, node: &str, label: &str) -> Option<&NodeId> {
        self.outgoing(node)
            .find(|e| e.has_label(label))
            .map(|e| &e.target)
    }

    /// ACTION success path: the `success`-labeled edge, else the default.
    #[must_use]
    pub fn action_success_target(&self, node: &str) -> Option<&NodeId> {
        self.labeled_target(node, LABEL_SUCCESS)
            .or_else(|| self.default_target(node))
    }

    /// ACTION error path, if one was authored.
    #[must_use]
    pub fn action_error_target(&self, node: &str) -> Option<&NodeId> {
        self.labeled_target(node, LABEL_ERROR)
    }

    /// Pure, side-effect-free resolution of the next node after `node`.
    ///
    /// For CONDITION nodes, predicates are evaluated in declaration order
    /// and the first match wins, falling back to the default edge. For every
    /// other non-terminal type the single outgoing edge's target is
    /// returned. Terminal types yield [`NextStep::Terminal`].
    ///
    /// On a validated graph this never fails; errors surface only when a
    /// graph skipped [`validate`](Self::validate).
    pub fn resolve_next(
        &self,
        node: &Node,
        variables: &FxHashMap<String, String>,
    ) -> Result<NextStep, ValidationError> {
        match &node.kind {
            NodeKind::End { .. } | NodeKind::Handoff { .. } => Ok(NextStep::Terminal),
            NodeKind::Jump {
                node: target,
                flow: None,
            } => {
                if self.nodes.contains_key(target) {
                    Ok(NextStep::Node(target.clone()))
                } else {
                    Err(ValidationError::UnknownJumpTarget {
                        node: node.id.clone(),
                        target: target.clone(),
                    })
                }
            }
            // Cross-flow jumps are resolved by the engine against the target
            // graph; resolve_next only reports the local exit.
            NodeKind::Jump { .. } => Ok(NextStep::Terminal),
            NodeKind::Condition {
                branches,
                default_edge,
            } => {
                for branch in branches {
                    if branch.when.evaluate(variables) {
                        return self.branch_target(node, &branch.edge);
                    }
                }
                self.branch_target(node, default_edge)
            }
            NodeKind::Start
            | NodeKind::Message { .. }
            | NodeKind::Question { .. }
            | NodeKind::SetVariable { .. }
            | NodeKind::Action { .. }
            | NodeKind::Delay { .. } => self
                .default_target(&node.id)
                .map(|t| NextStep::Node(t.clone()))
                .ok_or_else(|| ValidationError::DeadEnd {
                    node: node.id.clone(),
                }),
        }
    }

    fn branch_target(&self, node: &Node, edge_id: &str) -> Result<NextStep, ValidationError> {
        let edge = self
            .edge_by_id(edge_id)
            .ok_or_else(|| ValidationError::UnknownBranchEdge {
                node: node.id.clone(),
                edge: edge_id.to_string(),
            })?;
        Ok(NextStep::Node(edge.target.clone()))
    }

    /// Publish-time validation of the structural invariants.
    ///
    /// Checks: exactly one START; edge endpoints and ids resolve; every
    /// non-terminal node has an outgoing edge; non-condition nodes do not
    /// fan out; condition branch and default edges exist and originate at
    /// the condition node; question variables are named; same-flow jump
    /// targets exist.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.start_node()?;

        let mut seen_edges: FxHashMap<&str, ()> = FxHashMap::default();
        for edge in &self.edges {
            if seen_edges.insert(edge.id.as_str(), ()).is_some() {
                return Err(ValidationError::DuplicateEdge {
                    edge: edge.id.clone(),
                });
            }
            for endpoint in [&edge.source, &edge.target] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(ValidationError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
        }

        for node in self.nodes.values() {
            // Serde deserialization cannot produce key/id mismatches through
            // the builder, but hand-assembled maps can.
            if !self.nodes.contains_key(&node.id) {
                return Err(ValidationError::UnknownNode {
                    node: node.id.clone(),
                });
            }

            match &node.kind {
                NodeKind::End { .. } | NodeKind::Handoff { .. } => {}
                NodeKind::Jump { flow, node: target } => {
                    if flow.is_none() && !self.nodes.contains_key(target) {
                        return Err(ValidationError::UnknownJumpTarget {
                            node: node.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
                NodeKind::Condition {
                    branches,
                    default_edge,
                } => {
                    for edge_id in branches
                        .iter()
                        .map(|b| &b.edge)
                        .chain(std::iter::once(default_edge))
                    {
                        let edge = self.edge_by_id(edge_id).ok_or_else(|| {
                            ValidationError::UnknownBranchEdge {
                                node: node.id.clone(),
                                edge: edge_id.clone(),
                            }
                        })?;
                        if edge.source != node.id {
                            return Err(ValidationError::ForeignBranchEdge {
                                node: node.id.clone(),
                                edge: edge_id.clone(),
                            });
                        }
                    }
                }
                NodeKind::Question { variable, .. } => {
                    if variable.trim().is_empty() {
                        return Err(ValidationError::EmptyVariable {
                            node: node.id.clone(),
                        });
                    }
                    self.require_single_exit(node)?;
                }
                NodeKind::Action { .. } => {
                    // Success path may come from a labeled or unlabeled edge.
                    if self.action_success_target(&node.id).is_none() {
                        return Err(ValidationError::DeadEnd {
                            node: node.id.clone(),
                        });
                    }
                }
                NodeKind::Start
                | NodeKind::Message { .. }
                | NodeKind::SetVariable { .. }
                | NodeKind::Delay { .. } => {
                    self.require_single_exit(node)?;
                }
            }
        }

        Ok(())
    }

    fn require_single_exit(&self, node: &Node) -> Result<(), ValidationError> {
        let unlabeled = self
            .outgoing(&node.id)
            .filter(|e| e.label.is_none())
            .count();
        match unlabeled {
            1 => Ok(()),
            0 if self.outgoing(&node.id).count() == 1 => Ok(()),
            0 => Err(ValidationError::DeadEnd {
                node: node.id.clone(),
            }),
            n => Err(ValidationError::AmbiguousEdges {
                node: node.id.clone(),
                count: n,
            }),
        }
    }
}
