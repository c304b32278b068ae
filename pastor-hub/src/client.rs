use pastor_core::{NodeId, Order, OrderId, TelemetryEvent};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use ulid::Ulid;

use crate::api::{
    alerts::{AlertResponse, CreateAlertRequest, ListAlertsQuery, ListAlertsResponse},
    fences::{
        CheckPointQuery, CheckPointResponse, FenceResponse, ListFencesQuery, ListFencesResponse,
        UpsertFenceRequest,
    },
    orders::{CreateOrderRequest, ListOrdersQuery, ListOrdersResponse, MarkDeliveredResponse},
    telemetry::ListEventsQuery,
};
use crate::ingest::BatchReport;

/// Error type for API client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned error status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Resource not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// HTTP API client for pastor-hub.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    base_url: String,
}

impl Client {
    /// Create a new API client with the given base URL.
    ///
    /// # Example
    /// ```no_run
    /// use pastor_hub::client::Client;
    ///
    /// let client = Client::new("http://localhost:10001");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http_client(HttpClient::new(), base_url)
    }

    /// Create a new API client with a custom reqwest client.
    pub fn with_http_client(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let response = self.http.get(self.url("/health")).send().await?;
        Ok(response.status().is_success())
    }

    // -------------------------------------------------------------------------
    // Telemetry
    // -------------------------------------------------------------------------

    /// Post a node telemetry batch. `entries` is sent as the `data` array.
    pub async fn send_node_batch(&self, entries: Vec<Value>) -> Result<BatchReport, ClientError> {
        self.post_batch("/api/nodes/telemetry/batch", json!({ "data": entries }))
            .await
    }

    /// Post a batch using the legacy cow collar field names.
    pub async fn send_cow_batch(&self, entries: Vec<Value>) -> Result<BatchReport, ClientError> {
        self.post_batch("/api/cows/telemetry/batch", json!({ "data": entries }))
            .await
    }

    /// Post flat sensor readings.
    pub async fn send_sensor_readings(&self, entries: Vec<Value>) -> Result<BatchReport, ClientError> {
        self.post_batch("/api/nodes/sensors", Value::Array(entries)).await
    }

    async fn post_batch(&self, path: &str, body: Value) -> Result<BatchReport, ClientError> {
        let response = self.http.post(self.url(path)).json(&body).send().await?;

        handle_response(response).await
    }

    /// Newest events first.
    pub async fn list_events(
        &self,
        node_id: &NodeId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryEvent>, ClientError> {
        let url = self.url(&format!("/api/nodes/{node_id}/events"));

        let response = self
            .http
            .get(&url)
            .query(&ListEventsQuery { limit })
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn latest_event(&self, node_id: &NodeId) -> Result<TelemetryEvent, ClientError> {
        let url = self.url(&format!("/api/nodes/{node_id}/latest"));

        let response = self.http.get(&url).send().await?;

        handle_response(response).await
    }

    // -------------------------------------------------------------------------
    // Fences
    // -------------------------------------------------------------------------

    pub async fn create_fence(&self, request: &UpsertFenceRequest) -> Result<FenceResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/api/fences"))
            .json(request)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn update_fence(
        &self,
        id: Ulid,
        request: &UpsertFenceRequest,
    ) -> Result<FenceResponse, ClientError> {
        let url = self.url(&format!("/api/fences/{id}"));

        let response = self.http.put(&url).json(request).send().await?;

        handle_response(response).await
    }

    pub async fn get_fence(&self, id: Ulid) -> Result<FenceResponse, ClientError> {
        let url = self.url(&format!("/api/fences/{id}"));

        let response = self.http.get(&url).send().await?;

        handle_response(response).await
    }

    pub async fn list_fences(&self, farm_id: Option<&str>) -> Result<ListFencesResponse, ClientError> {
        let query = ListFencesQuery {
            farm_id: farm_id.map(str::to_string),
        };

        let response = self
            .http
            .get(self.url("/api/fences"))
            .query(&query)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn delete_fence(&self, id: Ulid) -> Result<(), ClientError> {
        let url = self.url(&format!("/api/fences/{id}"));

        let response = self.http.delete(&url).send().await?;

        handle_empty_response(response).await
    }

    pub async fn check_point(
        &self,
        farm_id: &str,
        lat: f64,
        lon: f64,
    ) -> Result<CheckPointResponse, ClientError> {
        let query = CheckPointQuery {
            farm_id: farm_id.to_string(),
            lat,
            lon,
        };

        let response = self
            .http
            .get(self.url("/api/fences/check"))
            .query(&query)
            .send()
            .await?;

        handle_response(response).await
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    pub async fn list_orders(&self, query: &ListOrdersQuery) -> Result<ListOrdersResponse, ClientError> {
        let response = self
            .http
            .get(self.url("/api/orders"))
            .query(query)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Pending orders for one node.
    pub async fn pending_orders(&self, node_id: &NodeId) -> Result<ListOrdersResponse, ClientError> {
        self.list_orders(&ListOrdersQuery {
            status: Some("pending".to_string()),
            node_id: Some(node_id.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn create_order(&self, kind: &str, payload: Value) -> Result<Order, ClientError> {
        let request = CreateOrderRequest {
            kind: kind.to_string(),
            payload,
        };

        let response = self
            .http
            .post(self.url("/api/orders"))
            .json(&request)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn mark_order_processed(&self, id: OrderId) -> Result<Order, ClientError> {
        let url = self.url(&format!("/api/orders/{id}/processed"));

        let response = self.http.post(&url).send().await?;

        handle_response(response).await
    }

    /// Returns the number of orders that were settled.
    pub async fn mark_orders_delivered(&self, node_id: &NodeId) -> Result<u64, ClientError> {
        let url = self.url(&format!("/api/orders/delivered/{node_id}"));

        let response = self.http.post(&url).send().await?;

        let body: MarkDeliveredResponse = handle_response(response).await?;
        Ok(body.updated)
    }

    // -------------------------------------------------------------------------
    // Alerts
    // -------------------------------------------------------------------------

    pub async fn list_alerts(&self, query: &ListAlertsQuery) -> Result<ListAlertsResponse, ClientError> {
        let response = self
            .http
            .get(self.url("/api/alerts"))
            .query(query)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn create_alert(&self, request: &CreateAlertRequest) -> Result<AlertResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/api/alerts"))
            .json(request)
            .send()
            .await?;

        handle_response(response).await
    }

    pub async fn mark_alert_sent(&self, id: Ulid) -> Result<AlertResponse, ClientError> {
        let url = self.url(&format!("/api/alerts/{id}/sent"));

        let response = self.http.patch(&url).send().await?;

        handle_response(response).await
    }
}

/// Helper to handle HTTP responses and convert them to our Result type.
async fn handle_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();

    if status.is_success() {
        Ok(response.json().await?)
    } else {
        Err(error_from(response).await)
    }
}

async fn handle_empty_response(response: reqwest::Response) -> Result<(), ClientError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from(response).await)
    }
}

async fn error_from(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();

    match status {
        reqwest::StatusCode::NOT_FOUND => ClientError::NotFound,
        reqwest::StatusCode::BAD_REQUEST => ClientError::BadRequest(message),
        _ => ClientError::ServerError {
            status: status.as_u16(),
            message,
        },
    }
}
