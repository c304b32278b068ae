mod common;

use std::time::Duration;

use common::*;
use jiff::Timestamp;
use pastor_core::{
    Alert, AlertId, EventData, EventId, EventType, FarmId, Node, NodeId, NodeMetadata, Order,
    OrderId, OrderKind, OrderStatus, TelemetryEvent, geo::GeoPoint,
};
use pastor_hub::{
    clock::window_floor,
    cooldown::CooldownMode,
    ingest::{EntryStatus, FieldMapping},
    registry::{
        AlertRegistry, EventRegistry, FenceRegistry, NodeRegistry, OrderRegistry, Registries,
        RegistryError,
        filter::{AlertFilter, OrderFilter},
        sqlite::SqliteRegistry,
    },
};
use serde_json::json;
use tempfile::NamedTempFile;
use ulid::Ulid;

fn later(minutes: i64) -> Timestamp {
    start() + jiff::SignedDuration::from_mins(minutes)
}

fn event(node: &str, at: Timestamp, temperature: f64) -> TelemetryEvent {
    let mut event_data = EventData {
        temperature: Some(temperature),
        ..Default::default()
    };
    event_data.set_position(Some(40.0), Some(-8.0));
    TelemetryEvent {
        id: EventId(Ulid::new()),
        node_id: NodeId::from(node),
        base_id: None,
        event_type: EventType::Telemetry,
        event_data,
        created_at: at,
    }
}

fn breach_order(node: &str, at: Timestamp) -> Order {
    Order {
        id: OrderId(Ulid::new()),
        kind: OrderKind::FenceBreach,
        node_id: Some(NodeId::from(node)),
        payload: json!({ "device_id": node }),
        status: OrderStatus::Pending,
        created_at: at,
        processed_at: None,
    }
}

#[tokio::test]
async fn sqlite_node_metadata_lifecycle() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = SqliteRegistry::new(temp_file.path()).await?;

    let id = NodeId::from("n1");
    registry
        .insert_node(Node {
            id: id.clone(),
            name: Some("node_n1".into()),
            tag_id: None,
            birth_date: None,
            breed: Some("Alentejana".into()),
            created_at: start(),
            updated_at: start(),
        })
        .await?;

    let metadata = NodeMetadata {
        name: Some("Marta".into()),
        birth_date: Some(jiff::civil::date(2022, 4, 10)),
        ..Default::default()
    };
    let updated = registry
        .update_node_metadata(&id, &metadata, later(5))
        .await?
        .unwrap();

    assert_eq!(updated.name.as_deref(), Some("Marta"));
    assert_eq!(updated.breed.as_deref(), Some("Alentejana"));
    assert_eq!(updated.birth_date, Some(jiff::civil::date(2022, 4, 10)));
    assert_eq!(updated.created_at, start());
    assert_eq!(updated.updated_at, later(5));

    let missing = registry
        .update_node_metadata(&NodeId::from("ghost"), &metadata, later(5))
        .await?;
    assert!(missing.is_none());
    assert_eq!(registry.list_nodes().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn sqlite_events_newest_first() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = SqliteRegistry::new(temp_file.path()).await?;

    registry.insert_event(event("n1", start(), 38.0)).await?;
    registry.insert_event(event("n1", later(10), 38.5)).await?;
    // Same timestamp: the last insert wins.
    let tie = event("n1", later(10), 39.5);
    let tie_id = tie.id;
    registry.insert_event(tie).await?;
    registry.insert_event(event("n2", later(20), 37.0)).await?;

    let latest = registry.latest_event(&NodeId::from("n1")).await?.unwrap();
    assert_eq!(latest.id, tie_id);
    assert_eq!(latest.event_data.temperature, Some(39.5));
    assert_eq!(latest.event_data.latitude, Some(40.0));

    let all = registry.list_events(&NodeId::from("n1"), None).await?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].created_at, start());

    let two = registry.list_events(&NodeId::from("n1"), Some(2)).await?;
    assert_eq!(two.len(), 2);

    assert!(registry.latest_event(&NodeId::from("n3")).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn sqlite_alert_filters_and_sent_flag() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = SqliteRegistry::new(temp_file.path()).await?;

    let alert = |node: &str, code: i64, at: Timestamp| Alert {
        id: AlertId(Ulid::new()),
        node_id: NodeId::from(node),
        base_id: None,
        alert_type: code,
        source_event_id: Some(EventId(Ulid::new())),
        latitude: Some(40.0),
        longitude: Some(-8.0),
        node_battery: Some(71.0),
        temperature: None,
        sent: false,
        created_at: at,
    };

    let first = alert("n1", 52, start());
    let first_id = first.id;
    registry.insert_alert(first).await?;
    registry.insert_alert(alert("n1", 1, later(1))).await?;
    registry.insert_alert(alert("n2", 12, later(2))).await?;

    let n1 = registry
        .list_alerts(AlertFilter {
            node_id: Some(NodeId::from("n1")),
            ..Default::default()
        })
        .await?;
    assert_eq!(n1.len(), 2);
    assert_eq!(n1[0].alert_type, 1);

    let sent = registry.mark_alert_sent(first_id).await?.unwrap();
    assert!(sent.sent);
    assert_eq!(sent.label(), "TEMPERATURE_CRITICAL");

    let unsent = registry
        .list_alerts(AlertFilter {
            sent: Some(false),
            ..Default::default()
        })
        .await?;
    assert_eq!(unsent.len(), 2);

    assert!(registry.mark_alert_sent(AlertId(Ulid::new())).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn sqlite_order_dedupe_and_delivery() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = SqliteRegistry::new(temp_file.path()).await?;
    let window = Duration::from_secs(600);

    let at = start();
    let created = registry
        .insert_order_unless_recent(breach_order("n1", at), window_floor(at, window))
        .await?;
    assert!(created.is_some());

    let at = later(4);
    let duplicate = registry
        .insert_order_unless_recent(breach_order("n1", at), window_floor(at, window))
        .await?;
    assert!(duplicate.is_none());

    let other = registry
        .insert_order_unless_recent(breach_order("n2", at), window_floor(at, window))
        .await?;
    assert!(other.is_some());

    let at = later(11);
    let again = registry
        .insert_order_unless_recent(breach_order("n1", at), window_floor(at, window))
        .await?;
    assert!(again.is_some());

    let pending_n1 = registry
        .list_orders(OrderFilter {
            node_id: Some(NodeId::from("n1")),
            ..OrderFilter::pending()
        })
        .await?;
    assert_eq!(pending_n1.len(), 2);

    let updated = registry
        .mark_pending_processed_by_node(&NodeId::from("n1"), later(12))
        .await?;
    assert_eq!(updated, 2);

    let pending = registry.list_orders(OrderFilter::pending()).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node_id, Some(NodeId::from("n2")));

    let processed = registry
        .mark_order_processed(pending[0].id, later(13))
        .await?
        .unwrap();
    assert_eq!(processed.status, OrderStatus::Processed);
    assert_eq!(processed.processed_at, Some(later(13)));

    Ok(())
}

#[tokio::test]
async fn sqlite_fence_upsert_and_spatial_queries() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = SqliteRegistry::new(temp_file.path()).await?;

    let fence = registry.upsert_fence(pasture(FARM, "North"), start()).await?;
    assert_eq!(fence.version, 1);
    registry.upsert_fence(pasture("farm-2", "Elsewhere"), start()).await?;

    let mut replacement = pasture(FARM, "North (extended)");
    replacement.id = Some(fence.id);
    replacement.geometry = square(CENTRE.0, CENTRE.1, 0.02);
    let replaced = registry.upsert_fence(replacement, later(1)).await?;
    assert_eq!(replaced.version, 2);
    assert_eq!(replaced.created_at, start());
    assert_eq!(replaced.updated_at, later(1));

    let stored = registry.get_fence(fence.id).await?.unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(&*stored.name, "North (extended)");
    assert_eq!(stored.geometry.vertices().len(), replaced.geometry.vertices().len());

    let farm = FarmId::from(FARM);
    assert_eq!(registry.list_fences(Some(&farm)).await?.len(), 1);
    assert_eq!(registry.list_fences(None).await?.len(), 2);

    let centre = GeoPoint::new(CENTRE.0, CENTRE.1);
    let hits = registry.fences_containing(&farm, centre).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(&*hits[0].name, "North (extended)");

    // Inside the extended square but outside the original one.
    let edge = GeoPoint::new(CENTRE.0 + 0.015, CENTRE.1);
    assert_eq!(registry.fences_containing(&farm, edge).await?.len(), 1);

    let outside = GeoPoint::new(OUTSIDE.0, OUTSIDE.1);
    assert!(registry.fences_containing(&farm, outside).await?.is_empty());
    let nearest = registry.nearest_fence(&farm, outside).await?.unwrap();
    assert_eq!(nearest.fence_id, fence.id);
    assert!(nearest.distance_m > 3000.0 && nearest.distance_m < 4000.0);

    assert!(registry.delete_fence(fence.id).await?);
    assert!(!registry.delete_fence(fence.id).await?);
    assert!(registry.nearest_fence(&farm, outside).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn sqlite_backs_the_full_pipeline() -> Result<(), RegistryError> {
    let temp_file = NamedTempFile::new().unwrap();
    let registries = Registries::sqlite(temp_file.path()).await?;
    let h = Harness::with_registries(registries, CooldownMode::Enforce);
    add_pasture(&h.registries).await;

    let mut flagged = node_entry("n1", OUTSIDE);
    flagged["event_data"]["isAlerted"] = json!(true);
    flagged["event_data"]["alertType"] = json!(52);

    let report = h
        .ingestor
        .ingest_batch(&[flagged, node_entry("n1", OUTSIDE)], FieldMapping::Node)
        .await;
    assert!(report.results.iter().all(|r| r.status == EntryStatus::Ok));

    let events = h.registries.events.list_events(&NodeId::from("n1"), None).await?;
    assert_eq!(events.len(), 2);
    assert_eq!(
        h.registries.alerts.list_alerts(AlertFilter::default()).await?.len(),
        1
    );
    assert_eq!(h.push.sent().len(), 1);
    assert_eq!(h.registries.orders.list_orders(OrderFilter::pending()).await?.len(), 1);

    Ok(())
}
