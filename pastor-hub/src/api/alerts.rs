use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use pastor_core::{Alert, AlertId, BaseId, NodeId};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::registry::filter::AlertFilter;

use super::{ApiState, bad_request};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListAlertsQuery {
    pub node_id: Option<String>,
    pub sent: Option<bool>,
    pub limit: Option<usize>,
}

/// Manually raised alert, e.g. from an operator console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    pub node_id: String,
    #[serde(rename = "type")]
    pub alert_type: i64,
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub node_battery: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// An alert with its human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertResponse {
    #[serde(flatten)]
    pub alert: Alert,
    pub label: String,
}

impl From<Alert> for AlertResponse {
    fn from(alert: Alert) -> Self {
        let label = alert.label().to_string();
        Self { alert, label }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListAlertsResponse {
    pub alerts: Vec<AlertResponse>,
    pub total: usize,
}

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<ListAlertsQuery>,
) -> impl IntoResponse {
    let filter = AlertFilter {
        node_id: query.node_id.as_deref().map(NodeId::from),
        sent: query.sent,
        limit: query.limit,
    };

    match state.ingestor.registries().alerts.list_alerts(filter).await {
        Ok(alerts) => {
            let total = alerts.len();
            let response = ListAlertsResponse {
                alerts: alerts.into_iter().map(AlertResponse::from).collect(),
                total,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list alerts");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list alerts").into_response()
        }
    }
}

/// POST /api/alerts
pub async fn create_alert(
    State(state): State<ApiState>,
    Json(request): Json<CreateAlertRequest>,
) -> impl IntoResponse {
    if request.node_id.trim().is_empty() {
        return bad_request("`node_id` is required");
    }

    let alert = Alert {
        id: AlertId(Ulid::new()),
        node_id: NodeId::from(request.node_id.trim()),
        base_id: request.base_id.as_deref().map(BaseId::from),
        alert_type: request.alert_type,
        source_event_id: None,
        latitude: request.latitude,
        longitude: request.longitude,
        node_battery: request.node_battery,
        temperature: request.temperature,
        sent: false,
        created_at: state.ingestor.clock().now(),
    };

    match state.ingestor.registries().alerts.insert_alert(alert.clone()).await {
        Ok(()) => {
            tracing::info!(alert_id = %alert.id, node_id = %alert.node_id, kind = alert.label(), "alert created");
            (StatusCode::CREATED, Json(AlertResponse::from(alert))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create alert");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create alert").into_response()
        }
    }
}

/// PATCH /api/alerts/{id}/sent
pub async fn mark_sent(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(id) = id.parse::<Ulid>() else {
        return bad_request("Invalid alert ID");
    };

    match state.ingestor.registries().alerts.mark_alert_sent(AlertId(id)).await {
        Ok(Some(alert)) => (StatusCode::OK, Json(AlertResponse::from(alert))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Alert not found").into_response(),
        Err(e) => {
            tracing::error!(alert_id = %id, error = %e, "Failed to mark alert sent");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to mark alert sent").into_response()
        }
    }
}
