pub mod filter;
pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use pastor_core::{
    Alert, AlertId, FarmId, Fence, FenceHit, FenceId, NearestFence, Node, NodeId, NodeMetadata,
    Order, OrderId, TelemetryEvent,
    geo::{GeoPoint, GeometryError, Polygon},
};
use thiserror::Error;

use filter::{AlertFilter, OrderFilter};
use memory::{
    InMemoryAlertRegistry, InMemoryEventRegistry, InMemoryFenceRegistry, InMemoryNodeRegistry,
    InMemoryOrderRegistry,
};
use sqlite::SqliteRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, RegistryError>;

    async fn insert_node(&self, node: Node) -> Result<(), RegistryError>;

    /// Overwrites only the fields `metadata` carries. Returns `None` for unknown nodes.
    async fn update_node_metadata(
        &self,
        id: &NodeId,
        metadata: &NodeMetadata,
        at: Timestamp,
    ) -> Result<Option<Node>, RegistryError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, RegistryError>;
}

#[async_trait]
pub trait EventRegistry: Send + Sync {
    async fn insert_event(&self, event: TelemetryEvent) -> Result<(), RegistryError>;

    /// Most recent event by `created_at`; the later insert wins a tie.
    async fn latest_event(&self, node: &NodeId) -> Result<Option<TelemetryEvent>, RegistryError>;

    /// Newest first.
    async fn list_events(
        &self,
        node: &NodeId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryEvent>, RegistryError>;
}

#[async_trait]
pub trait AlertRegistry: Send + Sync {
    async fn insert_alert(&self, alert: Alert) -> Result<(), RegistryError>;

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, RegistryError>;

    async fn mark_alert_sent(&self, id: AlertId) -> Result<Option<Alert>, RegistryError>;
}

#[async_trait]
pub trait OrderRegistry: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<(), RegistryError>;

    /// Inserts `order` unless one of the same kind for the same node was
    /// created at or after `since`. Check and insert are a single step.
    async fn insert_order_unless_recent(
        &self,
        order: Order,
        since: Timestamp,
    ) -> Result<Option<Order>, RegistryError>;

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RegistryError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RegistryError>;

    async fn mark_order_processed(
        &self,
        id: OrderId,
        at: Timestamp,
    ) -> Result<Option<Order>, RegistryError>;

    /// Moves every pending order referencing `node` to processed.
    async fn mark_pending_processed_by_node(
        &self,
        node: &NodeId,
        at: Timestamp,
    ) -> Result<u64, RegistryError>;
}

/// Fence create-or-replace request.
#[derive(Debug, Clone)]
pub struct FenceUpsert {
    /// Unknown or absent ids create a new fence.
    pub id: Option<FenceId>,
    pub farm_id: FarmId,
    pub name: Box<str>,
    pub geometry: Polygon,
    pub props: serde_json::Value,
    /// Defaults to the previous version plus one, or 1.
    pub version: Option<u32>,
}

impl FenceUpsert {
    pub(crate) fn into_fence(self, previous: Option<&Fence>, at: Timestamp) -> Fence {
        let version = self
            .version
            .unwrap_or_else(|| previous.map_or(1, |p| p.version.saturating_add(1)));

        Fence {
            id: self.id.unwrap_or_else(|| FenceId(ulid::Ulid::new())),
            farm_id: self.farm_id,
            name: self.name,
            geometry: self.geometry,
            props: self.props,
            version,
            created_at: previous.map_or(at, |p| p.created_at),
            updated_at: at,
        }
    }
}

/// Spatial query service over farm fences.
#[async_trait]
pub trait FenceRegistry: Send + Sync {
    async fn list_fences(&self, farm: Option<&FarmId>) -> Result<Vec<Fence>, RegistryError>;

    async fn get_fence(&self, id: FenceId) -> Result<Option<Fence>, RegistryError>;

    async fn upsert_fence(&self, fence: FenceUpsert, at: Timestamp)
    -> Result<Fence, RegistryError>;

    async fn delete_fence(&self, id: FenceId) -> Result<bool, RegistryError>;

    async fn fences_containing(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Vec<FenceHit>, RegistryError>;

    async fn nearest_fence(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Option<NearestFence>, RegistryError>;
}

/// One handle per registry capability.
#[derive(Clone)]
pub struct Registries {
    pub nodes: Arc<dyn NodeRegistry>,
    pub events: Arc<dyn EventRegistry>,
    pub alerts: Arc<dyn AlertRegistry>,
    pub orders: Arc<dyn OrderRegistry>,
    pub fences: Arc<dyn FenceRegistry>,
}

impl Registries {
    pub fn memory() -> Self {
        Self {
            nodes: Arc::new(InMemoryNodeRegistry::new()),
            events: Arc::new(InMemoryEventRegistry::new()),
            alerts: Arc::new(InMemoryAlertRegistry::new()),
            orders: Arc::new(InMemoryOrderRegistry::new()),
            fences: Arc::new(InMemoryFenceRegistry::new()),
        }
    }

    pub async fn sqlite(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let registry = SqliteRegistry::new(path).await?;
        Ok(Self::from_backend(registry))
    }

    pub fn from_backend<B>(backend: B) -> Self
    where
        B: NodeRegistry
            + EventRegistry
            + AlertRegistry
            + OrderRegistry
            + FenceRegistry
            + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            nodes: backend.clone(),
            events: backend.clone(),
            alerts: backend.clone(),
            orders: backend.clone(),
            fences: backend,
        }
    }
}
