use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use pastor_core::{NodeId, Order, OrderId, OrderStatus};
use tokio::sync::RwLock;

use super::newest_first;
use crate::registry::{OrderRegistry, RegistryError, filter::OrderFilter};

#[derive(Clone, Default)]
pub struct InMemoryOrderRegistry {
    orders: Arc<RwLock<Vec<Order>>>,
}

impl InMemoryOrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRegistry for InMemoryOrderRegistry {
    async fn insert_order(&self, order: Order) -> Result<(), RegistryError> {
        let mut orders = self.orders.write().await;
        orders.push(order);
        Ok(())
    }

    async fn insert_order_unless_recent(
        &self,
        order: Order,
        since: Timestamp,
    ) -> Result<Option<Order>, RegistryError> {
        // The write lock is held across check and insert.
        let mut orders = self.orders.write().await;
        let duplicate = orders.iter().any(|o| {
            o.kind == order.kind && o.node_id == order.node_id && o.created_at >= since
        });
        if duplicate {
            return Ok(None);
        }

        orders.push(order.clone());
        Ok(Some(order))
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RegistryError> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders.iter().filter(|o| filter.matches(o)).cloned().collect();
        matching.sort_by_key(|o| o.created_at);
        Ok(newest_first(matching, filter.limit))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RegistryError> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|o| o.id == id).cloned())
    }

    async fn mark_order_processed(
        &self,
        id: OrderId,
        at: Timestamp,
    ) -> Result<Option<Order>, RegistryError> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.iter_mut().find(|o| o.id == id) else {
            return Ok(None);
        };

        if order.status == OrderStatus::Pending {
            order.status = OrderStatus::Processed;
            order.processed_at = Some(at);
        }
        Ok(Some(order.clone()))
    }

    async fn mark_pending_processed_by_node(
        &self,
        node: &NodeId,
        at: Timestamp,
    ) -> Result<u64, RegistryError> {
        let mut orders = self.orders.write().await;
        let mut updated = 0;
        for order in orders
            .iter_mut()
            .filter(|o| o.status == OrderStatus::Pending && o.node_id.as_ref() == Some(node))
        {
            order.status = OrderStatus::Processed;
            order.processed_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }
}
