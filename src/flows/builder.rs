//! Fluent construction of flow graphs.
//!
//! Mirrors how flows arrive from the authoring collaborator, but in code:
//! add nodes and edges, then [`build`](FlowGraphBuilder::build) to run
//! publish-time validation and obtain an immutable [`FlowGraph`].
//!
//! # Examples
//!
//! ```
//! use chatflow::flows::{FlowGraphBuilder, NodeKind};
//!
//! let graph = FlowGraphBuilder::new("welcome")
//!     .add_node("start", NodeKind::Start)
//!     .add_node("greet", NodeKind::Message { text: "Hi!".into() })
//!     .add_node("done", NodeKind::End { text: None })
//!     .add_edge("e1", "start", "greet")
//!     .add_edge("e2", "greet", "done")
//!     .build()
//!     .expect("valid graph");
//!
//! assert_eq!(graph.version, 1);
//! assert_eq!(graph.nodes.len(), 3);
//! ```

use rustc_hash::FxHashMap;

use crate::types::{EdgeId, FlowId, NodeId};

use super::edges::Edge;
use super::graph::{FlowGraph, FlowSettings, ValidationError};
use super::node::{Node, NodeKind};

/// Builder for [`FlowGraph`].
pub struct FlowGraphBuilder {
    flow_id: FlowId,
    version: u32,
    nodes: FxHashMap<NodeId, Node>,
    edges: Vec<Edge>,
    settings: FlowSettings,
    duplicate_node: Option<NodeId>,
}

impl FlowGraphBuilder {
    #[must_use]
    pub fn new(flow_id: impl Into<FlowId>) -> Self {
        Self {
            flow_id: flow_id.into(),
            version: 1,
            nodes: FxHashMap::default(),
            edges: Vec::new(),
            settings: FlowSettings::default(),
            duplicate_node: None,
        }
    }

    /// Set the published version (defaults to 1). Publishing an edit of an
    /// existing flow should bump this; prior versions are never mutated.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a node. Duplicate ids are reported by [`build`](Self::build).
    #[must_use]
    pub fn add_node(mut self, id: impl Into<NodeId>, kind: NodeKind) -> Self {
        let id = id.into();
        if self.nodes.contains_key(&id) && self.duplicate_node.is_none() {
            self.duplicate_node = Some(id.clone());
        }
        self.nodes.insert(id.clone(), Node { id, kind });
        self
    }

    /// Add an unlabeled edge.
    #[must_use]
    pub fn add_edge(
        mut self,
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        self.edges.push(Edge::new(id, source, target));
        self
    }

    /// Add a labeled edge (e.g. ACTION `success`/`error` paths).
    #[must_use]
    pub fn add_labeled_edge(
        mut self,
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        label: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge::new(id, source, target).labeled(label));
        self
    }

    /// Validate and produce the immutable graph.
    pub fn build(self) -> Result<FlowGraph, ValidationError> {
        if let Some(node) = self.duplicate_node {
            return Err(ValidationError::DuplicateNode { node });
        }
        let graph = FlowGraph {
            flow_id: self.flow_id,
            version: self.version,
            nodes: self.nodes,
            edges: self.edges,
            settings: self.settings,
        };
        graph.validate()?;
        Ok(graph)
    }
}
