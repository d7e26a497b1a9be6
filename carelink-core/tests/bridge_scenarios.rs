//! End-to-end bridge scenarios driven through mock transports and upstreams

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use carelink_core::bridge::{LiveBridge, MockTransport};
use carelink_core::store::ManualClock;
use carelink_core::upstream::{MockInput, MockLiveConnector};
use carelink_core::{
    ConnectionId, ConnectionRegistry, LiveConfig, MemorySessionStore, ServerFrame, SessionStore,
    UpstreamEvent,
};

struct World {
    registry: Arc<ConnectionRegistry>,
    store: Arc<MemorySessionStore>,
    clock: Arc<ManualClock>,
    connector: MockLiveConnector,
}

impl World {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            store: Arc::new(MemorySessionStore::with_clock(
                Duration::from_secs(60),
                clock.clone(),
            )),
            clock,
            connector: MockLiveConnector::new(),
        }
    }

    fn bridge(&self) -> LiveBridge {
        LiveBridge::new(
            ConnectionId::new(),
            LiveConfig::default(),
            self.store.clone(),
            self.registry.clone(),
            Arc::new(self.connector.clone()),
        )
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never satisfied");
}

// Fresh session: no prior handle, ping/pong exchange, handle saved on close.
#[tokio::test]
async fn fresh_session_relays_and_saves_handle_on_disconnect() {
    let world = World::new();
    let bridge = world.bridge();
    let (transport, mut handle) = MockTransport::pair();

    handle.send_json(r#"{"setup": {"model": "live-audio"}}"#).await;
    let task = tokio::spawn(bridge.run(transport));
    world.connector.wait_subscribed().await;

    // no prior handle, so the connect was fresh
    assert_eq!(world.connector.connect_handles(), vec![None]);

    handle.send_json(r#"{"text": "ping"}"#).await;
    wait_until(|| {
        world.connector.sent_inputs() == vec![MockInput::Text("ping".to_string())]
    })
    .await;

    world.connector.emit(UpstreamEvent::ResumptionUpdate {
        handle: "T1".to_string(),
    });
    world.connector.emit(UpstreamEvent::Text {
        text: "pong".to_string(),
    });
    handle
        .wait_for_frame(|f| matches!(f, ServerFrame::Text { text } if text == "pong"))
        .await;

    handle.disconnect();
    task.await.unwrap().unwrap();

    assert_eq!(world.store.load().await, Some("T1".to_string()));
    assert_eq!(world.registry.count().await, 0);
}

// A handle saved 10s ago, window 60s: the next connect resumes with it.
#[tokio::test]
async fn recent_handle_is_used_for_resumption() {
    let world = World::new();
    world.store.save("T1").await;
    world.clock.advance(Duration::from_secs(10));

    let bridge = world.bridge();
    let (transport, mut handle) = MockTransport::pair();
    handle.send_json(r#"{"setup": {}}"#).await;
    let task = tokio::spawn(bridge.run(transport));
    world.connector.wait_subscribed().await;

    assert_eq!(
        world.connector.connect_handles(),
        vec![Some("T1".to_string())]
    );

    handle.disconnect();
    task.await.unwrap().unwrap();
}

// A handle saved 120s ago, window 60s: expired, so the connect is fresh.
#[tokio::test]
async fn expired_handle_falls_back_to_a_fresh_session() {
    let world = World::new();
    world.store.save("T1").await;
    world.clock.advance(Duration::from_secs(120));

    let bridge = world.bridge();
    let (transport, mut handle) = MockTransport::pair();
    handle.send_json(r#"{"setup": {}}"#).await;
    let task = tokio::spawn(bridge.run(transport));
    world.connector.wait_subscribed().await;

    assert_eq!(world.connector.connect_handles(), vec![None]);

    handle.disconnect();
    task.await.unwrap().unwrap();
}

// Two sequential sessions share the single resumption slot.
#[tokio::test]
async fn second_session_resumes_where_the_first_left_off() {
    let world = World::new();

    let bridge = world.bridge();
    let (transport, mut handle) = MockTransport::pair();
    handle.send_json(r#"{"setup": {}}"#).await;
    let task = tokio::spawn(bridge.run(transport));
    world.connector.wait_subscribed().await;
    world.connector.emit(UpstreamEvent::ResumptionUpdate {
        handle: "T2".to_string(),
    });
    world.connector.emit(UpstreamEvent::Text {
        text: "ok".to_string(),
    });
    handle
        .wait_for_frame(|f| matches!(f, ServerFrame::Text { .. }))
        .await;
    handle.disconnect();
    task.await.unwrap().unwrap();

    let second = World {
        registry: world.registry.clone(),
        store: world.store.clone(),
        clock: world.clock.clone(),
        connector: MockLiveConnector::new(),
    };
    let bridge = second.bridge();
    let (transport, mut handle) = MockTransport::pair();
    handle.send_json(r#"{"setup": {}}"#).await;
    let task = tokio::spawn(bridge.run(transport));
    second.connector.wait_subscribed().await;

    assert_eq!(
        second.connector.connect_handles(),
        vec![Some("T2".to_string())]
    );

    handle.disconnect();
    task.await.unwrap().unwrap();
}
