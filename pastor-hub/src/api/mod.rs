pub mod alerts;
pub mod fences;
pub mod orders;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use crate::ingest::Ingestor;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ingestor: Arc<Ingestor>,
}

/// Body of 400 responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the full API router with all endpoints.
pub fn api_router(ingestor: Arc<Ingestor>) -> Router {
    let state = ApiState { ingestor };

    Router::new()
        .route("/health", get(health))
        .route("/api/nodes/telemetry/batch", post(telemetry::node_batch))
        .route("/api/cows/telemetry/batch", post(telemetry::cow_batch))
        .route("/api/nodes/sensors", post(telemetry::sensor_readings))
        .route("/api/nodes/{id}/events", get(telemetry::list_events))
        .route("/api/nodes/{id}/latest", get(telemetry::latest_event))
        .route("/api/fences", get(fences::list_fences).post(fences::create_fence))
        .route("/api/fences/check", get(fences::check_point))
        .route(
            "/api/fences/{id}",
            get(fences::get_fence)
                .put(fences::update_fence)
                .delete(fences::delete_fence),
        )
        .route("/api/orders", get(orders::list_orders).post(orders::create_order))
        .route("/api/orders/{id}/processed", post(orders::mark_processed))
        .route("/api/orders/delivered/{node_id}", post(orders::mark_delivered))
        .route("/api/alerts", get(alerts::list_alerts).post(alerts::create_alert))
        .route("/api/alerts/{id}/sent", patch(alerts::mark_sent))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
