//! Shared application state for the carelink server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use carelink_core::{
    AudioGenerator, ConnectionRegistry, LiveConfig, LiveConnector, NotificationDispatcher,
    SessionStore,
};

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Registry of currently connected clients
    pub registry: Arc<ConnectionRegistry>,
    /// Single-slot store for the upstream resumption handle
    pub store: Arc<dyn SessionStore>,
    /// Connector for the conversational upstream profile
    pub connector: Arc<dyn LiveConnector>,
    /// Voice synthesis for notifications
    pub audio: Arc<dyn AudioGenerator>,
    /// Fan-out dispatcher for voice notifications
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Timing configuration handed to each bridge
    pub live_config: LiveConfig,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioGenerator>,
        store: Arc<dyn SessionStore>,
        live_config: LiveConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(audio.clone(), registry.clone()));

        Self {
            registry,
            store,
            connector,
            audio,
            dispatcher,
            live_config,
            started_at: Utc::now(),
        }
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::notify::MockAudioGenerator;
    use carelink_core::upstream::MockLiveConnector;
    use carelink_core::MemorySessionStore;
    use std::time::Duration;

    #[test]
    fn uptime_starts_at_zero() {
        let state = AppState::new(
            Arc::new(MockLiveConnector::new()),
            Arc::new(MockAudioGenerator::new("QUJD")),
            Arc::new(MemorySessionStore::new(Duration::from_secs(60))),
            LiveConfig::default(),
        );
        assert!(state.uptime_seconds() >= 0);
    }
}
