use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use jiff::Timestamp;
use pastor_core::{
    Alert, AlertId, BaseId, EventId, EventType, FarmId, Fence, FenceHit, FenceId, NearestFence,
    Node, NodeId, NodeMetadata, Order, OrderId, OrderKind, OrderStatus, TelemetryEvent,
    geo::{GeoPoint, Polygon},
};
use sqlx::{
    Row, SqlitePool,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
    },
};
use ulid::Ulid;

use super::{
    AlertRegistry, EventRegistry, FenceRegistry, FenceUpsert, NodeRegistry, OrderRegistry,
    RegistryError,
    filter::{AlertFilter, OrderFilter},
};

/// All registries over a single SQLite database.
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

/// SQLite reads `LIMIT -1` as unbounded.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn parse_ulid(column: &str, value: &str) -> Result<Ulid, RegistryError> {
    Ulid::from_str(value).map_err(|_| RegistryError::Corrupt(format!("{column}: {value}")))
}

fn parse_millis(column: &str, value: i64) -> Result<Timestamp, RegistryError> {
    Timestamp::from_millisecond(value)
        .map_err(|_| RegistryError::Corrupt(format!("{column}: {value}")))
}

fn row_to_node(r: &SqliteRow) -> Result<Node, RegistryError> {
    let birth_date = r
        .try_get::<Option<String>, _>("birth_date")?
        .map(|s| {
            s.parse::<jiff::civil::Date>()
                .map_err(|_| RegistryError::Corrupt(format!("birth_date: {s}")))
        })
        .transpose()?;

    Ok(Node {
        id: NodeId(r.try_get::<String, _>("id")?.into_boxed_str()),
        name: r.try_get::<Option<String>, _>("name")?.map(String::into_boxed_str),
        tag_id: r.try_get::<Option<String>, _>("tag_id")?.map(String::into_boxed_str),
        birth_date,
        breed: r.try_get::<Option<String>, _>("breed")?.map(String::into_boxed_str),
        created_at: parse_millis("created_at", r.try_get("created_at")?)?,
        updated_at: parse_millis("updated_at", r.try_get("updated_at")?)?,
    })
}

fn row_to_event(r: &SqliteRow) -> Result<TelemetryEvent, RegistryError> {
    let id: String = r.try_get("id")?;
    let event_data: String = r.try_get("event_data")?;

    Ok(TelemetryEvent {
        id: EventId(parse_ulid("id", &id)?),
        node_id: NodeId(r.try_get::<String, _>("node_id")?.into_boxed_str()),
        base_id: r
            .try_get::<Option<String>, _>("base_id")?
            .map(|s| BaseId(s.into_boxed_str())),
        event_type: EventType::from(r.try_get::<String, _>("event_type")?),
        event_data: serde_json::from_str(&event_data)?,
        created_at: parse_millis("created_at", r.try_get("created_at")?)?,
    })
}

fn row_to_alert(r: &SqliteRow) -> Result<Alert, RegistryError> {
    let id: String = r.try_get("id")?;
    let source_event_id = r
        .try_get::<Option<String>, _>("source_event_id")?
        .map(|s| parse_ulid("source_event_id", &s).map(EventId))
        .transpose()?;

    Ok(Alert {
        id: AlertId(parse_ulid("id", &id)?),
        node_id: NodeId(r.try_get::<String, _>("node_id")?.into_boxed_str()),
        base_id: r
            .try_get::<Option<String>, _>("base_id")?
            .map(|s| BaseId(s.into_boxed_str())),
        alert_type: r.try_get("alert_type")?,
        source_event_id,
        latitude: r.try_get("latitude")?,
        longitude: r.try_get("longitude")?,
        node_battery: r.try_get("node_battery")?,
        temperature: r.try_get("temperature")?,
        sent: r.try_get("sent")?,
        created_at: parse_millis("created_at", r.try_get("created_at")?)?,
    })
}

fn row_to_order(r: &SqliteRow) -> Result<Order, RegistryError> {
    let id: String = r.try_get("id")?;
    let status: String = r.try_get("status")?;
    let payload: String = r.try_get("payload")?;

    Ok(Order {
        id: OrderId(parse_ulid("id", &id)?),
        kind: OrderKind::from(r.try_get::<String, _>("kind")?),
        node_id: r
            .try_get::<Option<String>, _>("node_id")?
            .map(|s| NodeId(s.into_boxed_str())),
        payload: serde_json::from_str(&payload)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| RegistryError::Corrupt(format!("status: {status}")))?,
        created_at: parse_millis("created_at", r.try_get("created_at")?)?,
        processed_at: r
            .try_get::<Option<i64>, _>("processed_at")?
            .map(|ms| parse_millis("processed_at", ms))
            .transpose()?,
    })
}

fn row_to_fence(r: &SqliteRow) -> Result<Fence, RegistryError> {
    let id: String = r.try_get("id")?;
    let geometry: String = r.try_get("geometry")?;
    let props: String = r.try_get("props")?;
    let version: i64 = r.try_get("version")?;

    Ok(Fence {
        id: FenceId(parse_ulid("id", &id)?),
        farm_id: FarmId(r.try_get::<String, _>("farm_id")?.into_boxed_str()),
        name: r.try_get::<String, _>("name")?.into_boxed_str(),
        geometry: Polygon::from_geojson(&serde_json::from_str(&geometry)?)?,
        props: serde_json::from_str(&props)?,
        version: u32::try_from(version)
            .map_err(|_| RegistryError::Corrupt(format!("version: {version}")))?,
        created_at: parse_millis("created_at", r.try_get("created_at")?)?,
        updated_at: parse_millis("updated_at", r.try_get("updated_at")?)?,
    })
}

const NODE_COLUMNS: &str = "id, name, tag_id, birth_date, breed, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, node_id, base_id, event_type, event_data, created_at";
const ALERT_COLUMNS: &str = "id, node_id, base_id, alert_type, source_event_id, latitude, \
     longitude, node_battery, temperature, sent, created_at";
const ORDER_COLUMNS: &str = "id, kind, node_id, payload, status, created_at, processed_at";
const FENCE_COLUMNS: &str = "id, farm_id, name, geometry, props, version, created_at, updated_at";

#[async_trait]
impl NodeRegistry for SqliteRegistry {
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, RegistryError> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
            .bind(&*id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_node).transpose()
    }

    async fn insert_node(&self, node: Node) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO nodes (id, name, tag_id, birth_date, breed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&*node.id.0)
        .bind(node.name.as_deref())
        .bind(node.tag_id.as_deref())
        .bind(node.birth_date.map(|d| d.to_string()))
        .bind(node.breed.as_deref())
        .bind(node.created_at.as_millisecond())
        .bind(node.updated_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_node_metadata(
        &self,
        id: &NodeId,
        metadata: &NodeMetadata,
        at: Timestamp,
    ) -> Result<Option<Node>, RegistryError> {
        let result = sqlx::query(
            r#"
            UPDATE nodes SET
                name = COALESCE(?, name),
                tag_id = COALESCE(?, tag_id),
                birth_date = COALESCE(?, birth_date),
                breed = COALESCE(?, breed),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(metadata.name.as_deref())
        .bind(metadata.tag_id.as_deref())
        .bind(metadata.birth_date.map(|d| d.to_string()))
        .bind(metadata.breed.as_deref())
        .bind(at.as_millisecond())
        .bind(&*id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_node(id).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        let rows = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_node).collect()
    }
}

#[async_trait]
impl EventRegistry for SqliteRegistry {
    async fn insert_event(&self, event: TelemetryEvent) -> Result<(), RegistryError> {
        let event_data = serde_json::to_string(&event.event_data)?;

        sqlx::query(
            r#"
            INSERT INTO node_events (id, node_id, base_id, event_type, event_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.0.to_string())
        .bind(&*event.node_id.0)
        .bind(event.base_id.as_ref().map(|b| &*b.0))
        .bind(event.event_type.as_str())
        .bind(&event_data)
        .bind(event.created_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_event(&self, node: &NodeId) -> Result<Option<TelemetryEvent>, RegistryError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM node_events WHERE node_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(&*node.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn list_events(
        &self,
        node: &NodeId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryEvent>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM node_events WHERE node_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(&*node.0)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

#[async_trait]
impl AlertRegistry for SqliteRegistry {
    async fn insert_alert(&self, alert: Alert) -> Result<(), RegistryError> {
        sqlx::query(&format!(
            "INSERT INTO alerts ({ALERT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(alert.id.0.to_string())
        .bind(&*alert.node_id.0)
        .bind(alert.base_id.as_ref().map(|b| &*b.0))
        .bind(alert.alert_type)
        .bind(alert.source_event_id.map(|e| e.0.to_string()))
        .bind(alert.latitude)
        .bind(alert.longitude)
        .bind(alert.node_battery)
        .bind(alert.temperature)
        .bind(alert.sent)
        .bind(alert.created_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE (?1 IS NULL OR node_id = ?1) AND (?2 IS NULL OR sent = ?2) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?3"
        ))
        .bind(filter.node_id.as_ref().map(|n| &*n.0))
        .bind(filter.sent)
        .bind(sql_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_alert).collect()
    }

    async fn mark_alert_sent(&self, id: AlertId) -> Result<Option<Alert>, RegistryError> {
        let row = sqlx::query(&format!(
            "UPDATE alerts SET sent = 1 WHERE id = ? RETURNING {ALERT_COLUMNS}"
        ))
        .bind(id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_alert).transpose()
    }
}

fn dedupe_key(order: &Order, since: Timestamp) -> Option<String> {
    let window = order.created_at.as_millisecond() - since.as_millisecond();
    if window <= 0 {
        return None;
    }
    let bucket = order.created_at.as_millisecond().div_euclid(window);
    let node = order.node_id.as_ref().map_or("", |n| &*n.0);
    Some(format!("{}:{}:{}", order.kind, node, bucket))
}

#[async_trait]
impl OrderRegistry for SqliteRegistry {
    async fn insert_order(&self, order: Order) -> Result<(), RegistryError> {
        let payload = serde_json::to_string(&order.payload)?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(order.id.0.to_string())
        .bind(order.kind.as_str())
        .bind(order.node_id.as_ref().map(|n| &*n.0))
        .bind(&payload)
        .bind(order.status.as_str())
        .bind(order.created_at.as_millisecond())
        .bind(order.processed_at.map(|t| t.as_millisecond()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_order_unless_recent(
        &self,
        order: Order,
        since: Timestamp,
    ) -> Result<Option<Order>, RegistryError> {
        let payload = serde_json::to_string(&order.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, kind, node_id, payload, status, created_at, processed_at, dedupe_key)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM orders
                WHERE kind = ? AND node_id IS ? AND created_at >= ?
            )
            "#,
        )
        .bind(order.id.0.to_string())
        .bind(order.kind.as_str())
        .bind(order.node_id.as_ref().map(|n| &*n.0))
        .bind(&payload)
        .bind(order.status.as_str())
        .bind(order.created_at.as_millisecond())
        .bind(order.processed_at.map(|t| t.as_millisecond()))
        .bind(dedupe_key(&order, since))
        .bind(order.kind.as_str())
        .bind(order.node_id.as_ref().map(|n| &*n.0))
        .bind(since.as_millisecond())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(None),
            Ok(_) => Ok(Some(order)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR status = ?2) \
             AND (?3 IS NULL OR node_id = ?3) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?4"
        ))
        .bind(filter.kind.as_ref().map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.node_id.as_ref().map(|n| &*n.0))
        .bind(sql_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_order).collect()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RegistryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn mark_order_processed(
        &self,
        id: OrderId,
        at: Timestamp,
    ) -> Result<Option<Order>, RegistryError> {
        sqlx::query(
            "UPDATE orders SET status = 'processed', processed_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(at.as_millisecond())
        .bind(id.0.to_string())
        .execute(&self.pool)
        .await?;

        self.get_order(id).await
    }

    async fn mark_pending_processed_by_node(
        &self,
        node: &NodeId,
        at: Timestamp,
    ) -> Result<u64, RegistryError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'processed', processed_at = ? \
             WHERE node_id = ? AND status = 'pending'",
        )
        .bind(at.as_millisecond())
        .bind(&*node.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FenceRegistry for SqliteRegistry {
    async fn list_fences(&self, farm: Option<&FarmId>) -> Result<Vec<Fence>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FENCE_COLUMNS} FROM fences WHERE (?1 IS NULL OR farm_id = ?1) \
             ORDER BY created_at, id"
        ))
        .bind(farm.map(|f| &*f.0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fence).collect()
    }

    async fn get_fence(&self, id: FenceId) -> Result<Option<Fence>, RegistryError> {
        let row = sqlx::query(&format!("SELECT {FENCE_COLUMNS} FROM fences WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_fence).transpose()
    }

    async fn upsert_fence(
        &self,
        fence: FenceUpsert,
        at: Timestamp,
    ) -> Result<Fence, RegistryError> {
        let mut tx = self.pool.begin().await?;

        let previous = match fence.id {
            Some(id) => sqlx::query(&format!("SELECT {FENCE_COLUMNS} FROM fences WHERE id = ?"))
                .bind(id.0.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .as_ref()
                .map(row_to_fence)
                .transpose()?,
            None => None,
        };

        let fence = fence.into_fence(previous.as_ref(), at);
        let bbox = fence.geometry.bbox();
        let geometry = serde_json::to_string(&fence.geometry)?;
        let props = serde_json::to_string(&fence.props)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO fences
                (id, farm_id, name, geometry, props, version,
                 min_lat, min_lon, max_lat, max_lon, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fence.id.0.to_string())
        .bind(&*fence.farm_id.0)
        .bind(&*fence.name)
        .bind(&geometry)
        .bind(&props)
        .bind(i64::from(fence.version))
        .bind(bbox.min_lat)
        .bind(bbox.min_lon)
        .bind(bbox.max_lat)
        .bind(bbox.max_lon)
        .bind(fence.created_at.as_millisecond())
        .bind(fence.updated_at.as_millisecond())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(fence)
    }

    async fn delete_fence(&self, id: FenceId) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM fences WHERE id = ?")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fences_containing(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Vec<FenceHit>, RegistryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FENCE_COLUMNS} FROM fences \
             WHERE farm_id = ? AND min_lat <= ? AND max_lat >= ? AND min_lon <= ? AND max_lon >= ?"
        ))
        .bind(&*farm.0)
        .bind(point.lat)
        .bind(point.lat)
        .bind(point.lon)
        .bind(point.lon)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::new();
        for row in &rows {
            let fence = row_to_fence(row)?;
            if fence.geometry.contains(point) {
                hits.push(FenceHit {
                    fence_id: fence.id,
                    name: fence.name,
                });
            }
        }
        Ok(hits)
    }

    async fn nearest_fence(
        &self,
        farm: &FarmId,
        point: GeoPoint,
    ) -> Result<Option<NearestFence>, RegistryError> {
        let fences = self.list_fences(Some(farm)).await?;

        let mut nearest: Option<NearestFence> = None;
        for fence in fences {
            let distance_m = fence.geometry.distance_to(point);
            if !distance_m.is_finite() {
                continue;
            }
            if nearest.as_ref().is_none_or(|n| distance_m < n.distance_m) {
                nearest = Some(NearestFence {
                    fence_id: fence.id,
                    name: fence.name,
                    distance_m,
                });
            }
        }
        Ok(nearest)
    }
}
