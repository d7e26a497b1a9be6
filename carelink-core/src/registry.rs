//! Registry of currently connected client devices
//!
//! The registry is the single source of truth for who is connected and the
//! only component that performs broadcast sends. Mutations hold the write
//! lock; sends happen against a snapshot with no lock held.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SinkError;
use crate::notify::NotificationPayload;
use crate::protocol::ServerFrame;

/// Opaque identifier for a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound half of a client connection
///
/// The server implements this over the per-connection writer channel; tests
/// implement recording or failing sinks.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send_text(&self, payload: &str) -> Result<(), SinkError>;
}

struct Entry {
    sink: Arc<dyn ConnectionSink>,
    #[allow(dead_code)]
    registered_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

/// Result of a broadcast fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Tracks open client connections and fans payloads out to all of them
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an open connection and assigns its id
    pub async fn register(&self, sink: Arc<dyn ConnectionSink>) -> ConnectionId {
        let id = ConnectionId::new();
        let now = Utc::now();
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            Entry {
                sink,
                registered_at: now,
                last_activity: now,
            },
        );
        debug!("Registered connection {id} ({} total)", connections.len());
        id
    }

    /// Removes a connection. Idempotent; returns whether it was present.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            debug!("Deregistered connection {id} ({} total)", connections.len());
        }
        removed
    }

    /// Records activity on a connection
    pub async fn touch(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(&id) {
            entry.last_activity = Utc::now();
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends the payload to every registered connection
    ///
    /// Each send is isolated: one connection's failure is counted and does
    /// not abort the others. Sinks reporting the connection as permanently
    /// closed are deregistered afterwards.
    pub async fn broadcast(&self, payload: &NotificationPayload) -> DeliveryReport {
        let frame = ServerFrame::notification_broadcast(payload.clone());
        let serialized = match serde_json::to_string(&frame) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize broadcast payload: {e}");
                return DeliveryReport::default();
            }
        };

        let targets: Vec<(ConnectionId, Arc<dyn ConnectionSink>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, entry)| (*id, entry.sink.clone()))
                .collect()
        };

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();
        for (id, sink) in targets {
            match sink.send_text(&serialized).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Broadcast to {id} failed: {e}");
                    report.failed += 1;
                    if e.is_closed() {
                        closed.push(id);
                    }
                }
            }
        }

        for id in closed {
            self.deregister(id).await;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Classification;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        received: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: StdMutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConnectionSink for RecordingSink {
        async fn send_text(&self, payload: &str) -> Result<(), SinkError> {
            self.received.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    struct DeadSink;

    #[async_trait]
    impl ConnectionSink for DeadSink {
        async fn send_text(&self, _payload: &str) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    fn payload() -> NotificationPayload {
        NotificationPayload::new("nhắc nhở uống thuốc", "QUJD", Classification::Normal)
    }

    #[tokio::test]
    async fn count_tracks_register_and_deregister() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count().await, 0);

        let a = registry.register(RecordingSink::new()).await;
        let b = registry.register(RecordingSink::new()).await;
        assert_eq!(registry.count().await, 2);

        registry.deregister(a).await;
        assert_eq!(registry.count().await, 1);
        registry.deregister(b).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(RecordingSink::new()).await;

        assert!(registry.deregister(id).await);
        assert!(!registry.deregister(id).await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_with_identical_bytes() {
        let registry = ConnectionRegistry::new();
        let sinks: Vec<_> = (0..3).map(|_| RecordingSink::new()).collect();
        for sink in &sinks {
            registry.register(sink.clone()).await;
        }

        let report = registry.broadcast(&payload()).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);

        let first = sinks[0].received();
        assert_eq!(first.len(), 1);
        for sink in &sinks[1..] {
            assert_eq!(sink.received(), first);
        }
        let json: serde_json::Value = serde_json::from_str(&first[0]).unwrap();
        assert_eq!(json["type"], "voice_notification_response");
        assert_eq!(json["broadcast"], true);
    }

    #[tokio::test]
    async fn broadcast_isolates_failures_and_reports_both_counts() {
        let registry = ConnectionRegistry::new();
        let alive = RecordingSink::new();
        registry.register(alive.clone()).await;
        registry.register(Arc::new(DeadSink)).await;
        registry.register(RecordingSink::new()).await;

        let report = registry.broadcast(&payload()).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(alive.received().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_deregisters_closed_connections() {
        let registry = ConnectionRegistry::new();
        registry.register(RecordingSink::new()).await;
        registry.register(Arc::new(DeadSink)).await;
        assert_eq!(registry.count().await, 2);

        registry.broadcast(&payload()).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_with_empty_registry_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let report = registry.broadcast(&payload()).await;
        assert_eq!(report, DeliveryReport::default());
    }
}
