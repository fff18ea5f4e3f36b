//! Read-only access to published flow graphs.
//!
//! The engine never mutates flow definitions; it only reads published
//! versions through this seam. Production deployments back it with the
//! authoring collaborator's storage; tests and single-process setups use
//! [`InMemoryFlowProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::flows::FlowGraph;
use crate::types::FlowId;

use super::errors::EngineError;

/// Supplier of published, immutable flow graphs.
#[async_trait]
pub trait FlowProvider: Send + Sync {
    /// Fetch a published graph. `version: None` means the latest published
    /// version.
    async fn published_graph(
        &self,
        flow_id: &str,
        version: Option<u32>,
    ) -> Result<Arc<FlowGraph>, EngineError>;
}

/// Registry of published graphs held in memory, newest version last.
#[derive(Default)]
pub struct InMemoryFlowProvider {
    flows: RwLock<FxHashMap<FlowId, Vec<Arc<FlowGraph>>>>,
}

impl InMemoryFlowProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a graph. Versions are kept side by side so conversations
    /// mid-flight stay on the version bound to their state.
    pub async fn publish(&self, graph: FlowGraph) {
        let mut flows = self.flows.write().await;
        let versions = flows.entry(graph.flow_id.clone()).or_default();
        versions.push(Arc::new(graph));
        versions.sort_by_key(|g| g.version);
    }
}

#[async_trait]
impl FlowProvider for InMemoryFlowProvider {
    async fn published_graph(
        &self,
        flow_id: &str,
        version: Option<u32>,
    ) -> Result<Arc<FlowGraph>, EngineError> {
        let flows = self.flows.read().await;
        let versions = flows.get(flow_id).ok_or_else(|| EngineError::FlowUnavailable {
            flow_id: flow_id.to_string(),
        })?;
        let graph = match version {
            Some(v) => versions.iter().find(|g| g.version == v),
            None => versions.last(),
        };
        graph.cloned().ok_or_else(|| EngineError::FlowUnavailable {
            flow_id: flow_id.to_string(),
        })
    }
}
