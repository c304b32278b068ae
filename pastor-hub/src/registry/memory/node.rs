use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use jiff::Timestamp;
use pastor_core::{Node, NodeId, NodeMetadata};
use tokio::sync::RwLock;

use crate::registry::{NodeRegistry, RegistryError};

#[derive(Clone, Default)]
pub struct InMemoryNodeRegistry {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, RegistryError> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(id).cloned())
    }

    async fn insert_node(&self, node: Node) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().await;
        let _ = nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn update_node_metadata(
        &self,
        id: &NodeId,
        metadata: &NodeMetadata,
        at: Timestamp,
    ) -> Result<Option<Node>, RegistryError> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(id) else {
            return Ok(None);
        };

        metadata.apply_to(node);
        node.updated_at = at;
        Ok(Some(node.clone()))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<Node> = nodes.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }
}
