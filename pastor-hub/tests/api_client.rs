mod common;

use std::sync::Arc;

use common::*;
use pastor_core::{NodeId, OrderKind, OrderStatus};
use pastor_hub::{
    api::{
        alerts::{CreateAlertRequest, ListAlertsQuery},
        api_router,
        fences::UpsertFenceRequest,
    },
    client::{Client, ClientError},
    cooldown::CooldownMode,
    ingest::EntryStatus,
    registry::Registries,
};
use serde_json::json;
use tokio::net::TcpListener;
use ulid::Ulid;

async fn serve() -> (Client, Arc<RecordingPush>, Arc<RecordingBroadcaster>) {
    let h = Harness::with_registries(Registries::memory(), CooldownMode::Enforce);
    let push = h.push.clone();
    let broadcaster = h.broadcaster.clone();
    let app = api_router(Arc::new(h.ingestor));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Client::new(format!("http://{addr}")), push, broadcaster)
}

fn pasture_request(name: &str) -> UpsertFenceRequest {
    UpsertFenceRequest {
        farm_id: FARM.to_string(),
        name: name.to_string(),
        geometry: None,
        points: Some(vec![
            [CENTRE.0 - 0.01, CENTRE.1 - 0.01],
            [CENTRE.0 - 0.01, CENTRE.1 + 0.01],
            [CENTRE.0 + 0.01, CENTRE.1 + 0.01],
            [CENTRE.0 + 0.01, CENTRE.1 - 0.01],
        ]),
        props: Some(json!({ "grass": "ryegrass" })),
        version: None,
    }
}

#[tokio::test]
async fn health() {
    let (client, _, _) = serve().await;
    assert!(client.health().await.unwrap());
}

#[tokio::test]
async fn batch_endpoints_report_per_entry() {
    let (client, _, _) = serve().await;

    let report = client
        .send_node_batch(vec![node_entry("n1", CENTRE), json!({ "event_data": {} })])
        .await
        .unwrap();
    assert_eq!(report.message, "Telemetry data processed");
    assert_eq!(report.results[0].status, EntryStatus::Ok);
    assert_eq!(report.results[1].status, EntryStatus::Skipped);

    let latest = client.latest_event(&NodeId::from("n1")).await.unwrap();
    assert_eq!(Some(latest.id), report.results[0].event_id);

    let cows = client
        .send_cow_batch(vec![json!({ "cow_id": "7", "event_data": { "temperature": 38.0 } })])
        .await
        .unwrap();
    assert_eq!(cows.results[0].status, EntryStatus::Ok);

    let sensors = client
        .send_sensor_readings(vec![json!({ "id": "s1", "temperature": 41.0 })])
        .await
        .unwrap();
    assert_eq!(sensors.results[0].status, EntryStatus::Ok);

    let events = client.list_events(&NodeId::from("s1"), Some(10)).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type.as_str(), "temperature");
}

#[tokio::test]
async fn empty_or_malformed_batches_are_rejected() {
    let (client, _, _) = serve().await;

    let err = client.send_node_batch(vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));

    let err = client.send_cow_batch(vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));

    let err = client.send_sensor_readings(vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));

    let err = client.latest_event(&NodeId::from("nobody")).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound));
}

#[tokio::test]
async fn fence_crud_and_point_check() {
    let (client, _, broadcaster) = serve().await;

    let created = client.create_fence(&pasture_request("North")).await.unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.geometry["type"], "Polygon");
    assert_eq!(created.props["grass"], "ryegrass");
    let id: Ulid = created.id.parse().unwrap();

    let updated = client
        .update_fence(id, &pasture_request("North (renamed)"))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "North (renamed)");

    let listed = client.list_fences(Some(FARM)).await.unwrap();
    assert_eq!(listed.total, 1);
    assert_eq!(client.list_fences(Some("farm-9")).await.unwrap().total, 0);

    let inside = client.check_point(FARM, CENTRE.0, CENTRE.1).await.unwrap();
    assert!(inside.inside);
    assert_eq!(inside.fence_name.as_deref(), Some("North (renamed)"));

    let outside = client.check_point(FARM, OUTSIDE.0, OUTSIDE.1).await.unwrap();
    assert!(!outside.inside);
    assert_eq!(outside.nearest_fence_id.as_deref(), Some(created.id.as_str()));
    assert!(outside.distance_m.unwrap() > 4000.0);

    client.delete_fence(id).await.unwrap();
    assert!(matches!(client.get_fence(id).await, Err(ClientError::NotFound)));
    assert!(matches!(client.delete_fence(id).await, Err(ClientError::NotFound)));

    assert_eq!(
        broadcaster.topics(),
        vec![
            "fences/create".to_string(),
            "fences/update".to_string(),
            "fences/delete".to_string()
        ]
    );
}

#[tokio::test]
async fn invalid_fence_geometry_is_rejected() {
    let (client, _, _) = serve().await;

    let mut request = pasture_request("Line");
    request.points = Some(vec![[40.0, -8.0], [40.1, -8.0]]);
    let err = client.create_fence(&request).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));

    let mut both = pasture_request("Both");
    both.geometry = Some(json!({ "type": "Polygon", "coordinates": [] }));
    let err = client.create_fence(&both).await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));
}

#[tokio::test]
async fn breach_order_lifecycle_over_http() {
    let (client, push, _) = serve().await;
    client.create_fence(&pasture_request("North")).await.unwrap();

    client
        .send_node_batch(vec![node_entry("n1", OUTSIDE)])
        .await
        .unwrap();
    assert_eq!(push.sent().len(), 1);

    let node = NodeId::from("n1");
    let pending = client.pending_orders(&node).await.unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.orders[0].kind, OrderKind::FenceBreach);

    assert_eq!(client.mark_orders_delivered(&node).await.unwrap(), 1);
    assert_eq!(client.pending_orders(&node).await.unwrap().total, 0);
    assert_eq!(client.mark_orders_delivered(&node).await.unwrap(), 0);

    let manual = client
        .create_order("buzz", json!({ "device_id": "n2" }))
        .await
        .unwrap();
    assert_eq!(manual.status, OrderStatus::Pending);
    let processed = client.mark_order_processed(manual.id).await.unwrap();
    assert_eq!(processed.status, OrderStatus::Processed);
    assert!(processed.processed_at.is_some());
}

#[tokio::test]
async fn alerts_can_be_listed_and_acknowledged() {
    let (client, _, _) = serve().await;

    let mut flagged = node_entry("n1", CENTRE);
    flagged["event_data"]["isAlerted"] = json!(true);
    flagged["event_data"]["alertType"] = json!(51);
    client.send_node_batch(vec![flagged]).await.unwrap();

    let manual = client
        .create_alert(&CreateAlertRequest {
            node_id: "n2".to_string(),
            alert_type: 999,
            base_id: None,
            latitude: None,
            longitude: None,
            node_battery: None,
            temperature: None,
        })
        .await
        .unwrap();
    assert_eq!(manual.label, "UNKNOWN_ALERT");

    let all = client.list_alerts(&ListAlertsQuery::default()).await.unwrap();
    assert_eq!(all.total, 2);

    let n1 = client
        .list_alerts(&ListAlertsQuery {
            node_id: Some("n1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(n1.total, 1);
    assert_eq!(n1.alerts[0].label, "FALL_DETECTED");

    let acked = client.mark_alert_sent(n1.alerts[0].alert.id.0).await.unwrap();
    assert!(acked.alert.sent);

    let unsent = client
        .list_alerts(&ListAlertsQuery {
            sent: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unsent.total, 1);
    assert_eq!(unsent.alerts[0].alert.node_id, NodeId::from("n2"));

    assert!(matches!(
        client.mark_alert_sent(Ulid::new()).await,
        Err(ClientError::NotFound)
    ));
}
