use std::sync::Arc;

use async_trait::async_trait;
use pastor_core::{NodeId, TelemetryEvent};
use tokio::sync::RwLock;

use super::newest_first;
use crate::registry::{EventRegistry, RegistryError};

/// Append-only; insertion order breaks `created_at` ties.
#[derive(Clone, Default)]
pub struct InMemoryEventRegistry {
    events: Arc<RwLock<Vec<TelemetryEvent>>>,
}

impl InMemoryEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRegistry for InMemoryEventRegistry {
    async fn insert_event(&self, event: TelemetryEvent) -> Result<(), RegistryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn latest_event(&self, node: &NodeId) -> Result<Option<TelemetryEvent>, RegistryError> {
        let events = self.events.read().await;
        // max_by_key keeps the last maximum, which is the latest insert.
        Ok(events
            .iter()
            .filter(|e| &e.node_id == node)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn list_events(
        &self,
        node: &NodeId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryEvent>, RegistryError> {
        let events = self.events.read().await;
        let mut matching: Vec<TelemetryEvent> =
            events.iter().filter(|e| &e.node_id == node).cloned().collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(newest_first(matching, limit))
    }
}
