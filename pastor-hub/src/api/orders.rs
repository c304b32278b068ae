use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pastor_core::{NodeId, Order, OrderId, OrderKind, OrderStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::registry::filter::OrderFilter;

use super::{ApiState, bad_request};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub node_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<Order>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkDeliveredResponse {
    pub updated: u64,
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<ApiState>,
    Query(query): Query<ListOrdersQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref() {
        None => None,
        Some(s) => match OrderStatus::parse(s) {
            Some(status) => Some(status),
            None => return bad_request(format!("Unknown order status `{s}`")),
        },
    };

    let filter = OrderFilter {
        kind: query.kind.map(OrderKind::from),
        status,
        node_id: query.node_id.as_deref().map(NodeId::from),
        limit: query.limit,
    };

    match state.ingestor.orders().list(filter).await {
        Ok(orders) => {
            let total = orders.len();
            (StatusCode::OK, Json(ListOrdersResponse { orders, total })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list orders");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list orders").into_response()
        }
    }
}

/// Create a pending order. No deduplication is applied.
///
/// POST /api/orders
pub async fn create_order(
    State(state): State<ApiState>,
    Json(request): Json<CreateOrderRequest>,
) -> impl IntoResponse {
    if request.kind.trim().is_empty() {
        return bad_request("`type` is required");
    }

    let kind = OrderKind::from(request.kind.trim().to_string());
    match state.ingestor.orders().create_order(kind, request.payload).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create order");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create order").into_response()
        }
    }
}

/// POST /api/orders/{id}/processed
pub async fn mark_processed(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(id) = id.parse::<Ulid>() else {
        return bad_request("Invalid order ID");
    };

    match state.ingestor.orders().mark_processed(OrderId(id)).await {
        Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Order not found").into_response(),
        Err(e) => {
            tracing::error!(order_id = %id, error = %e, "Failed to mark order processed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to mark order processed").into_response()
        }
    }
}

/// Settle every pending order for a node once the device has acted on it.
///
/// POST /api/orders/delivered/{node_id}
pub async fn mark_delivered(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    let node_id = NodeId::from(node_id.as_str());

    match state.ingestor.orders().mark_delivered_by_node(&node_id).await {
        Ok(updated) => (StatusCode::OK, Json(MarkDeliveredResponse { updated })).into_response(),
        Err(e) => {
            tracing::error!(node_id = %node_id, error = %e, "Failed to mark orders delivered");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to mark orders delivered").into_response()
        }
    }
}
