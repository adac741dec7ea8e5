use std::sync::Arc;

use tokio::sync::RwLock;

use crate::wire::NodeId;

/// Whether a node knows its neighbors yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// No topology received. Values are still recorded, but nothing is
    /// forwarded.
    Unconfigured,
    /// Topology received. Forwarding reaches the configured neighbors.
    Active,
}

/// This node's dissemination neighbors. The list is replaced as a whole, so
/// readers never observe a partial one.
#[derive(Clone, Default)]
pub struct Topology {
    neighbors: Arc<RwLock<Option<Arc<[NodeId]>>>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the neighbor list. A repeat call reconfigures the node.
    pub async fn set_neighbors(&self, ids: Vec<NodeId>) {
        *self.neighbors.write().await = Some(ids.into());
    }

    /// The current neighbors, empty while unconfigured.
    pub async fn neighbors(&self) -> Arc<[NodeId]> {
        self.configured().await.unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// The current neighbors, or `None` before the first `set_neighbors`.
    pub async fn configured(&self) -> Option<Arc<[NodeId]>> {
        self.neighbors.read().await.clone()
    }

    pub async fn state(&self) -> NodeState {
        match *self.neighbors.read().await {
            Some(_) => NodeState::Active,
            None => NodeState::Unconfigured,
        }
    }
}
