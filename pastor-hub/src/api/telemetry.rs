use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pastor_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::FieldMapping;

use super::{ApiState, bad_request};

async fn ingest_data(state: ApiState, body: Value, mapping: FieldMapping) -> axum::response::Response {
    let entries = match body.get("data").and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => entries,
        _ => return bad_request("Invalid payload: expected non-empty array in `data`"),
    };

    let report = state.ingestor.ingest_batch(entries, mapping).await;
    (StatusCode::OK, Json(report)).into_response()
}

/// Ingest a batch of node telemetry.
///
/// POST /api/nodes/telemetry/batch
pub async fn node_batch(State(state): State<ApiState>, Json(body): Json<Value>) -> impl IntoResponse {
    ingest_data(state, body, FieldMapping::Node).await
}

/// Ingest a batch from legacy cow collars.
///
/// POST /api/cows/telemetry/batch
pub async fn cow_batch(State(state): State<ApiState>, Json(body): Json<Value>) -> impl IntoResponse {
    ingest_data(state, body, FieldMapping::Cow).await
}

/// Ingest flat sensor readings; the body is the array itself.
///
/// POST /api/nodes/sensors
pub async fn sensor_readings(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let entries = match body.as_array() {
        Some(entries) if !entries.is_empty() => entries,
        _ => return bad_request("Expected a non-empty array of node objects"),
    };

    let report = state.ingestor.ingest_batch(entries, FieldMapping::Sensor).await;
    (StatusCode::OK, Json(report)).into_response()
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListEventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/nodes/{id}/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> impl IntoResponse {
    let node_id = NodeId::from(id.as_str());
    let limit = Some(query.limit.unwrap_or(100));

    match state.ingestor.registries().events.list_events(&node_id, limit).await {
        Ok(events) => (StatusCode::OK, Json(events)).into_response(),
        Err(e) => {
            tracing::error!(node_id = %node_id, error = %e, "Failed to list node events");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list node events").into_response()
        }
    }
}

/// GET /api/nodes/{id}/latest
pub async fn latest_event(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let node_id = NodeId::from(id.as_str());

    match state.ingestor.registries().events.latest_event(&node_id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(event)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No events for node").into_response(),
        Err(e) => {
            tracing::error!(node_id = %node_id, error = %e, "Failed to get latest event");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get latest event").into_response()
        }
    }
}
