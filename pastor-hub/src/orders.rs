use std::sync::Arc;
use std::time::Duration;

use pastor_core::{FarmId, NodeId, Order, OrderId, OrderKind, OrderStatus};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::clock::{Clock, window_floor};
use crate::registry::{OrderRegistry, RegistryError, filter::OrderFilter};

/// A node left every fence of its farm.
#[derive(Debug, Clone)]
pub struct FenceBreach {
    pub node_id: NodeId,
    pub farm_id: Option<FarmId>,
    pub phone: Option<String>,
}

/// Creates and settles dispatch orders.
#[derive(Clone)]
pub struct OrderDispatcher {
    orders: Arc<dyn OrderRegistry>,
    clock: Arc<dyn Clock>,
    dedupe_window: Duration,
}

impl OrderDispatcher {
    pub fn new(orders: Arc<dyn OrderRegistry>, clock: Arc<dyn Clock>, dedupe_window: Duration) -> Self {
        Self {
            orders,
            clock,
            dedupe_window,
        }
    }

    /// Returns `None` when a fence-breach order for the same node already
    /// exists inside the dedupe window.
    pub async fn create_fence_breach_order(
        &self,
        breach: FenceBreach,
    ) -> Result<Option<Order>, RegistryError> {
        let now = self.clock.now();
        let order = Order {
            id: OrderId(Ulid::new()),
            kind: OrderKind::FenceBreach,
            node_id: Some(breach.node_id.clone()),
            payload: json!({
                "device_id": breach.node_id,
                "farm_id": breach.farm_id,
                "phone": breach.phone,
            }),
            status: OrderStatus::Pending,
            created_at: now,
            processed_at: None,
        };

        let since = window_floor(now, self.dedupe_window);
        let created = self.orders.insert_order_unless_recent(order, since).await?;

        match &created {
            Some(order) => tracing::info!(order_id = %order.id, node_id = %breach.node_id, "fence breach order created"),
            None => tracing::debug!(node_id = %breach.node_id, "fence breach order suppressed by dedupe window"),
        }

        Ok(created)
    }

    /// Creates a pending order without deduplication. The node reference is
    /// taken from `payload.device_id` when present.
    pub async fn create_order(&self, kind: OrderKind, payload: Value) -> Result<Order, RegistryError> {
        let node_id = payload
            .get("device_id")
            .and_then(Value::as_str)
            .map(NodeId::from);

        let order = Order {
            id: OrderId(Ulid::new()),
            kind,
            node_id,
            payload,
            status: OrderStatus::Pending,
            created_at: self.clock.now(),
            processed_at: None,
        };

        self.orders.insert_order(order.clone()).await?;
        Ok(order)
    }

    /// Marks every pending order referencing `node` as processed.
    pub async fn mark_delivered_by_node(&self, node: &NodeId) -> Result<u64, RegistryError> {
        let updated = self
            .orders
            .mark_pending_processed_by_node(node, self.clock.now())
            .await?;

        tracing::info!(node_id = %node, updated, "orders marked delivered");
        Ok(updated)
    }

    pub async fn mark_processed(&self, id: OrderId) -> Result<Option<Order>, RegistryError> {
        self.orders.mark_order_processed(id, self.clock.now()).await
    }

    pub async fn get(&self, id: OrderId) -> Result<Option<Order>, RegistryError> {
        self.orders.get_order(id).await
    }

    pub async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, RegistryError> {
        self.orders.list_orders(filter).await
    }
}
