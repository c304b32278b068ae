use pastor_core::{Alert, NodeId, Order, OrderKind, OrderStatus};

/// Alerts are always listed newest first.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub node_id: Option<NodeId>,
    pub sent: Option<bool>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(node_id) = &self.node_id
            && &alert.node_id != node_id
        {
            return false;
        }

        if let Some(sent) = self.sent
            && alert.sent != sent
        {
            return false;
        }

        true
    }
}

/// Orders are always listed newest first.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub kind: Option<OrderKind>,
    pub status: Option<OrderStatus>,
    pub node_id: Option<NodeId>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(OrderStatus::Pending),
            ..Default::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        if let Some(kind) = &self.kind
            && &order.kind != kind
        {
            return false;
        }

        if let Some(status) = self.status
            && order.status != status
        {
            return false;
        }

        if let Some(node_id) = &self.node_id
            && order.node_id.as_ref() != Some(node_id)
        {
            return false;
        }

        true
    }
}
