use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pastor_core::{FarmId, Fence, FenceId, geo::{GeoPoint, Polygon}};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::broadcast::topics;
use crate::geofence::PointCheck;
use crate::registry::FenceUpsert;

use super::{ApiState, bad_request};

/// Request body for creating or replacing a fence.
///
/// Exactly one of `geometry` (GeoJSON Polygon or Feature) and `points`
/// (`[lat, lon]` pairs) must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertFenceRequest {
    pub farm_id: String,
    pub name: String,
    #[serde(default, alias = "geojson", skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Response body for a fence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FenceResponse {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    pub geometry: Value,
    pub bbox: Value,
    pub centroid: Value,
    pub props: Value,
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Fence> for FenceResponse {
    fn from(f: Fence) -> Self {
        Self {
            id: f.id.to_string(),
            farm_id: f.farm_id.to_string(),
            name: f.name.to_string(),
            geometry: f.geometry.to_geojson(),
            bbox: f.geometry.bbox().to_geojson(),
            centroid: f.geometry.centroid().to_geojson(),
            props: f.props,
            version: f.version,
            created_at: f.created_at.to_string(),
            updated_at: f.updated_at.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFencesResponse {
    pub fences: Vec<FenceResponse>,
    pub total: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListFencesQuery {
    pub farm_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckPointQuery {
    pub farm_id: String,
    pub lat: f64,
    pub lon: f64,
}

/// Either `fence_id`/`fence_name` (inside) or the `nearest_*` fields (outside).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPointResponse {
    pub inside: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fence_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fence_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_fence_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl From<PointCheck> for CheckPointResponse {
    fn from(check: PointCheck) -> Self {
        let empty = Self {
            inside: false,
            fence_id: None,
            fence_name: None,
            nearest_fence_id: None,
            nearest_name: None,
            distance_m: None,
        };

        match check {
            PointCheck::Inside(hit) => Self {
                inside: true,
                fence_id: Some(hit.fence_id.to_string()),
                fence_name: Some(hit.name.to_string()),
                ..empty
            },
            PointCheck::Outside { nearest: Some(n) } => Self {
                nearest_fence_id: Some(n.fence_id.to_string()),
                nearest_name: Some(n.name.to_string()),
                distance_m: Some(n.distance_m),
                ..empty
            },
            PointCheck::Outside { nearest: None } => empty,
        }
    }
}

fn parse_fence_id(id: &str) -> Option<FenceId> {
    id.parse::<Ulid>().ok().map(FenceId)
}

fn parse_geometry(request: &UpsertFenceRequest) -> Result<Polygon, String> {
    let polygon = match (&request.geometry, &request.points) {
        (Some(geometry), None) => Polygon::from_geojson(geometry),
        (None, Some(points)) => Polygon::from_lat_lon(points),
        _ => return Err("Provide exactly one of `geometry` or `points`".to_string()),
    };
    polygon.map_err(|e| format!("Invalid geometry: {e}"))
}

async fn upsert(state: &ApiState, id: Option<FenceId>, request: UpsertFenceRequest) -> Response {
    if request.farm_id.trim().is_empty() || request.name.trim().is_empty() {
        return bad_request("`farm_id` and `name` are required");
    }
    let geometry = match parse_geometry(&request) {
        Ok(geometry) => geometry,
        Err(message) => return bad_request(message),
    };

    let fences = &state.ingestor.registries().fences;
    let existed = match id {
        Some(id) => matches!(fences.get_fence(id).await, Ok(Some(_))),
        None => false,
    };

    let upsert = FenceUpsert {
        id,
        farm_id: FarmId::from(request.farm_id.trim()),
        name: request.name.trim().into(),
        geometry,
        props: request.props.unwrap_or_else(|| json!({})),
        version: request.version,
    };

    let now = state.ingestor.clock().now();
    match fences.upsert_fence(upsert, now).await {
        Ok(fence) => {
            let response = FenceResponse::from(fence);
            let topic = if existed { topics::FENCE_UPDATE } else { topics::FENCE_CREATE };
            publish(state, topic, &response).await;

            let status = if existed { StatusCode::OK } else { StatusCode::CREATED };
            (status, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to upsert fence");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to upsert fence").into_response()
        }
    }
}

async fn publish<T: Serialize>(state: &ApiState, topic: &str, payload: &T) {
    let payload = match serde_json::to_value(payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(topic, error = %e, "failed to encode fence event");
            return;
        }
    };

    if let Err(e) = state.ingestor.broadcaster().publish(topic, &payload).await {
        tracing::warn!(topic, error = %e, "fence event broadcast failed");
    }
}

/// List fences, optionally scoped to a farm.
///
/// GET /api/fences
pub async fn list_fences(
    State(state): State<ApiState>,
    Query(query): Query<ListFencesQuery>,
) -> impl IntoResponse {
    let farm = query.farm_id.as_deref().map(FarmId::from);

    match state.ingestor.registries().fences.list_fences(farm.as_ref()).await {
        Ok(fences) => {
            let total = fences.len();
            let response = ListFencesResponse {
                fences: fences.into_iter().map(FenceResponse::from).collect(),
                total,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list fences");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list fences").into_response()
        }
    }
}

/// POST /api/fences
pub async fn create_fence(
    State(state): State<ApiState>,
    Json(request): Json<UpsertFenceRequest>,
) -> impl IntoResponse {
    upsert(&state, None, request).await
}

/// Replace a fence, creating it under this id if unknown.
///
/// PUT /api/fences/{id}
pub async fn update_fence(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<UpsertFenceRequest>,
) -> impl IntoResponse {
    let Some(id) = parse_fence_id(&id) else {
        return bad_request("Invalid fence ID");
    };
    upsert(&state, Some(id), request).await
}

/// GET /api/fences/{id}
pub async fn get_fence(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(id) = parse_fence_id(&id) else {
        return bad_request("Invalid fence ID");
    };

    match state.ingestor.registries().fences.get_fence(id).await {
        Ok(Some(fence)) => (StatusCode::OK, Json(FenceResponse::from(fence))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Fence not found").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to get fence");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get fence").into_response()
        }
    }
}

/// DELETE /api/fences/{id}
pub async fn delete_fence(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(fence_id) = parse_fence_id(&id) else {
        return bad_request("Invalid fence ID");
    };

    match state.ingestor.registries().fences.delete_fence(fence_id).await {
        Ok(true) => {
            publish(&state, topics::FENCE_DELETE, &json!({ "id": fence_id })).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => (StatusCode::NOT_FOUND, "Fence not found").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete fence");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete fence").into_response()
        }
    }
}

/// Which fence, if any, contains a point.
///
/// GET /api/fences/check?farm_id=&lat=&lon=
pub async fn check_point(
    State(state): State<ApiState>,
    Query(query): Query<CheckPointQuery>,
) -> impl IntoResponse {
    let point = GeoPoint::new(query.lat, query.lon);
    if !point.is_valid() {
        return bad_request("Invalid coordinates");
    }
    let farm = FarmId::from(query.farm_id.as_str());

    match state.ingestor.geofence().check_point(&farm, point).await {
        Ok(check) => (StatusCode::OK, Json(CheckPointResponse::from(check))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to check point against fences");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to check point").into_response()
        }
    }
}
