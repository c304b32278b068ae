mod common;

use std::sync::Arc;
use std::time::Duration;

use common::start;
use pastor_core::{FarmId, NodeId, OrderKind, OrderStatus};
use pastor_hub::{
    clock::ManualClock,
    orders::{FenceBreach, OrderDispatcher},
    registry::{
        OrderRegistry, RegistryError, filter::OrderFilter, memory::InMemoryOrderRegistry,
    },
};
use serde_json::json;

fn dispatcher() -> (OrderDispatcher, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let orders: Arc<dyn OrderRegistry> = Arc::new(InMemoryOrderRegistry::new());
    let dispatcher = OrderDispatcher::new(orders, clock.clone(), Duration::from_secs(600));
    (dispatcher, clock)
}

fn breach(node: &str) -> FenceBreach {
    FenceBreach {
        node_id: NodeId::from(node),
        farm_id: Some(FarmId::from("farm-1")),
        phone: None,
    }
}

#[tokio::test]
async fn breach_orders_are_deduplicated_per_node() -> Result<(), RegistryError> {
    let (dispatcher, clock) = dispatcher();

    let first = dispatcher.create_fence_breach_order(breach("n1")).await?;
    assert!(first.is_some());

    clock.advance(Duration::from_secs(5 * 60));
    assert!(dispatcher.create_fence_breach_order(breach("n1")).await?.is_none());

    // Other nodes are unaffected.
    assert!(dispatcher.create_fence_breach_order(breach("n2")).await?.is_some());

    clock.advance(Duration::from_secs(6 * 60));
    let again = dispatcher.create_fence_breach_order(breach("n1")).await?;
    assert!(again.is_some());

    let n1 = dispatcher
        .list(OrderFilter {
            node_id: Some(NodeId::from("n1")),
            ..Default::default()
        })
        .await?;
    assert_eq!(n1.len(), 2);
    // Newest first.
    assert_eq!(Some(n1[0].id), again.map(|o| o.id));

    Ok(())
}

#[tokio::test]
async fn generic_orders_skip_dedupe_and_pick_up_device_id() -> Result<(), RegistryError> {
    let (dispatcher, _clock) = dispatcher();

    let kind = OrderKind::from("buzz".to_string());
    let a = dispatcher
        .create_order(kind.clone(), json!({ "device_id": "n1", "seconds": 5 }))
        .await?;
    let b = dispatcher
        .create_order(kind.clone(), json!({ "device_id": "n1", "seconds": 5 }))
        .await?;

    assert_ne!(a.id, b.id);
    assert_eq!(a.node_id, Some(NodeId::from("n1")));
    assert_eq!(a.status, OrderStatus::Pending);

    let untargeted = dispatcher.create_order(kind, json!({})).await?;
    assert_eq!(untargeted.node_id, None);

    Ok(())
}

#[tokio::test]
async fn delivery_settles_only_that_nodes_pending_orders() -> Result<(), RegistryError> {
    let (dispatcher, clock) = dispatcher();

    let done = dispatcher.create_fence_breach_order(breach("n1")).await?.unwrap();
    dispatcher.mark_processed(done.id).await?;

    clock.advance(Duration::from_secs(11 * 60));
    dispatcher.create_fence_breach_order(breach("n1")).await?.unwrap();
    dispatcher.create_fence_breach_order(breach("n2")).await?.unwrap();

    clock.advance(Duration::from_secs(60));
    let updated = dispatcher.mark_delivered_by_node(&NodeId::from("n1")).await?;
    assert_eq!(updated, 1);

    let pending = dispatcher.list(OrderFilter::pending()).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node_id, Some(NodeId::from("n2")));

    // Already processed orders keep their original timestamp.
    let done = dispatcher.get(done.id).await?.unwrap();
    assert_eq!(done.processed_at, Some(start()));

    assert_eq!(dispatcher.mark_delivered_by_node(&NodeId::from("n1")).await?, 0);

    Ok(())
}
