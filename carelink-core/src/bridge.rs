//! Per-connection bridge between a client device and the upstream live session
//!
//! Each accepted connection runs one `LiveBridge`. The bridge performs the
//! setup handshake, opens or resumes the upstream session via the store,
//! relays frames in both directions, enforces the handshake and idle
//! timeouts, and persists the freshest resumption handle on the way down.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::LiveConfig;
use crate::error::{BridgeError, UpstreamError};
use crate::notify::{AudioGenerator, Classification, NotificationPayload};
use crate::protocol::{ClientFrame, NotificationReply, ServerFrame, Speaker};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::SessionStore;
use crate::upstream::{LiveConnector, LiveSession, UpstreamEvent};

/// Bridge lifecycle. `Closed` is terminal; a handshake timeout is the one
/// path allowed to skip `Active` and `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingHandshake,
    Active,
    Closing,
    Closed,
}

/// Client-side transport as the bridge sees it
///
/// `recv` yields raw text frames and `None` once the client is gone. The
/// server implements this over the WebSocket; tests use a channel pair.
#[async_trait::async_trait]
pub trait ClientTransport: Send {
    async fn recv(&mut self) -> Option<String>;

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), BridgeError>;
}

enum Flow {
    Continue,
    Stop,
}

/// State machine relaying one client connection to one upstream session
pub struct LiveBridge {
    id: ConnectionId,
    state: BridgeState,
    config: LiveConfig,
    store: Arc<dyn SessionStore>,
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn LiveConnector>,
    audio: Option<Arc<dyn AudioGenerator>>,
    last_handle: Option<String>,
}

impl LiveBridge {
    pub fn new(
        id: ConnectionId,
        config: LiveConfig,
        store: Arc<dyn SessionStore>,
        registry: Arc<ConnectionRegistry>,
        connector: Arc<dyn LiveConnector>,
    ) -> Self {
        Self {
            id,
            state: BridgeState::AwaitingHandshake,
            config,
            store,
            registry,
            connector,
            audio: None,
            last_handle: None,
        }
    }

    /// Enables in-session voice notification requests
    pub fn with_audio_generator(mut self, audio: Arc<dyn AudioGenerator>) -> Self {
        self.audio = Some(audio);
        self
    }

    fn set_state(&mut self, next: BridgeState) {
        debug!("Bridge {} state {:?} -> {next:?}", self.id, self.state);
        self.state = next;
    }

    /// Runs the bridge to completion
    ///
    /// Returns `Err` only for the conditions surfaced to the client: a
    /// handshake failure or a fatal upstream error. Cleanup (handle save,
    /// upstream close, registry deregistration) always happens.
    pub async fn run<T: ClientTransport>(mut self, mut transport: T) -> Result<(), BridgeError> {
        let result = self.drive(&mut transport).await;

        if let Err(e) = &result {
            warn!("Bridge {} ended with error: {e}", self.id);
            let _ = transport.send(&ServerFrame::error(e.to_string())).await;
        }

        self.set_state(BridgeState::Closed);
        self.registry.deregister(self.id).await;
        debug!("Bridge {} closed", self.id);
        result
    }

    async fn drive<T: ClientTransport>(&mut self, transport: &mut T) -> Result<(), BridgeError> {
        let setup = self.handshake(transport).await?;
        debug!("Bridge {} received setup: {setup}", self.id);

        let resume = self.store.load().await;
        if resume.is_some() {
            info!("Bridge {} resuming previous upstream session", self.id);
        }
        let mut session = self.connector.connect(resume).await?;
        self.set_state(BridgeState::Active);
        info!("Bridge {} active", self.id);

        let relay_result = self.relay(transport, session.as_mut()).await;

        self.set_state(BridgeState::Closing);
        if let Some(handle) = self.last_handle.clone() {
            self.store.save(&handle).await;
        }
        if let Err(e) = session.close().await {
            warn!("Bridge {} failed to close upstream session: {e}", self.id);
        }

        relay_result
    }

    async fn handshake<T: ClientTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<serde_json::Value, BridgeError> {
        let raw = match timeout(self.config.handshake_timeout(), transport.recv()).await {
            Err(_) => return Err(BridgeError::HandshakeTimeout),
            Ok(None) => return Err(BridgeError::ClientGone),
            Ok(Some(raw)) => raw,
        };
        match ClientFrame::parse(&raw) {
            Ok(ClientFrame::Setup(config)) => Ok(config),
            Ok(other) => Err(BridgeError::InvalidSetup(format!(
                "expected setup frame, got {other:?}"
            ))),
            Err(e) => Err(BridgeError::InvalidSetup(e.to_string())),
        }
    }

    async fn relay<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        session: &mut dyn LiveSession,
    ) -> Result<(), BridgeError> {
        let mut events = session.subscribe();

        let idle = tokio::time::sleep(self.config.idle_timeout());
        tokio::pin!(idle);

        let mut keepalive = tokio::time::interval(self.config.keepalive_interval());
        // the first tick completes immediately
        keepalive.tick().await;

        loop {
            tokio::select! {
                frame = transport.recv() => {
                    let Some(raw) = frame else {
                        info!("Bridge {} client disconnected", self.id);
                        return Ok(());
                    };
                    let frame = match ClientFrame::parse(&raw) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Bridge {} dropping unparseable frame: {e}", self.id);
                            continue;
                        }
                    };
                    if frame.is_activity() {
                        idle.as_mut().reset(Instant::now() + self.config.idle_timeout());
                        self.registry.touch(self.id).await;
                    }
                    match self.handle_client_frame(frame, transport, session).await? {
                        Flow::Continue => {}
                        Flow::Stop => return Ok(()),
                    }
                }
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Bridge {} lagged, skipped {skipped} upstream events", self.id);
                            continue;
                        }
                        Err(RecvError::Closed) => {
                            debug!("Bridge {} upstream event channel closed", self.id);
                            return Ok(());
                        }
                    };
                    if upstream_is_activity(&event) {
                        idle.as_mut().reset(Instant::now() + self.config.idle_timeout());
                    }
                    match self.handle_upstream_event(event, transport).await? {
                        Flow::Continue => {}
                        Flow::Stop => return Ok(()),
                    }
                }
                _ = &mut idle => {
                    info!("Bridge {} idle timeout reached", self.id);
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    if transport.send(&ServerFrame::keepalive()).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_client_frame<T: ClientTransport>(
        &mut self,
        frame: ClientFrame,
        transport: &mut T,
        session: &mut dyn LiveSession,
    ) -> Result<Flow, BridgeError> {
        match frame {
            ClientFrame::Setup(_) => {
                debug!("Bridge {} ignoring repeated setup frame", self.id);
            }
            ClientFrame::RealtimeInput { media_chunks } => {
                for chunk in media_chunks {
                    session.send_media(chunk).await?;
                }
            }
            ClientFrame::Text { text } => {
                session.send_text(&text).await?;
            }
            ClientFrame::Keepalive => {
                debug!("Bridge {} client keepalive", self.id);
            }
            ClientFrame::VoiceNotificationRequest {
                text,
                notification_type,
                request_id,
            } => {
                let reply = self.generate_notification(&text, notification_type).await;
                if transport
                    .send(&ServerFrame::notification_reply(request_id, reply))
                    .await
                    .is_err()
                {
                    return Ok(Flow::Stop);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn generate_notification(
        &self,
        text: &str,
        notification_type: Option<String>,
    ) -> NotificationReply {
        let Some(audio) = &self.audio else {
            return NotificationReply::Failed {
                message: "voice notifications unavailable".to_string(),
            };
        };
        let text = text.trim();
        if text.is_empty() {
            return NotificationReply::Failed {
                message: "notification text is required".to_string(),
            };
        }
        let classification = match notification_type.as_deref() {
            Some("urgent") | Some("emergency") => Classification::Urgent,
            _ => Classification::Normal,
        };
        let spoken = match classification {
            Classification::Urgent => format!("{}{text}", crate::notify::URGENT_PREFIX),
            Classification::Normal => text.to_string(),
        };
        match audio.generate(&spoken).await {
            Ok(audio_base64) => NotificationReply::Delivered {
                payload: NotificationPayload::new(text, audio_base64, classification),
            },
            Err(e) => NotificationReply::Failed {
                message: e.to_string(),
            },
        }
    }

    async fn handle_upstream_event<T: ClientTransport>(
        &mut self,
        event: UpstreamEvent,
        transport: &mut T,
    ) -> Result<Flow, BridgeError> {
        let frame = match event {
            UpstreamEvent::Audio { data } => ServerFrame::audio(data),
            UpstreamEvent::Text { text } => ServerFrame::text(text),
            UpstreamEvent::Transcription {
                text,
                sender,
                finished,
            } => ServerFrame::transcription(text, sender, finished),
            UpstreamEvent::Interrupted => ServerFrame::interrupted(),
            UpstreamEvent::TurnComplete => {
                ServerFrame::transcription("", Speaker::Assistant, true)
            }
            UpstreamEvent::GoAway => {
                debug!("Bridge {} upstream announced shutdown", self.id);
                return Ok(Flow::Continue);
            }
            UpstreamEvent::ResumptionUpdate { handle } => {
                debug!("Bridge {} received new resumption handle", self.id);
                self.last_handle = Some(handle.clone());
                // persisted immediately so a crash mid-session stays resumable
                self.store.save(&handle).await;
                return Ok(Flow::Continue);
            }
            UpstreamEvent::Closed { reason } => {
                return match reason {
                    Some(reason) => {
                        Err(BridgeError::Upstream(UpstreamError::SessionClosed { reason }))
                    }
                    None => Ok(Flow::Stop),
                };
            }
        };

        if transport.send(&frame).await.is_err() {
            info!("Bridge {} client unreachable, closing", self.id);
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }
}

fn upstream_is_activity(event: &UpstreamEvent) -> bool {
    !matches!(
        event,
        UpstreamEvent::GoAway
            | UpstreamEvent::ResumptionUpdate { .. }
            | UpstreamEvent::Closed { .. }
    )
}

pub use mock::{MockTransport, MockTransportHandle};

pub mod mock {
    //! Channel-backed client transport for tests

    use std::sync::{Arc, Mutex as StdMutex};

    use tokio::sync::mpsc;

    use super::*;

    /// Transport half handed to the bridge
    pub struct MockTransport {
        rx: mpsc::Receiver<String>,
        sent: Arc<StdMutex<Vec<ServerFrame>>>,
    }

    /// Test-side handle scripting the client
    pub struct MockTransportHandle {
        tx: Option<mpsc::Sender<String>>,
        sent: Arc<StdMutex<Vec<ServerFrame>>>,
    }

    impl MockTransport {
        pub fn pair() -> (MockTransport, MockTransportHandle) {
            let (tx, rx) = mpsc::channel(32);
            let sent = Arc::new(StdMutex::new(Vec::new()));
            (
                MockTransport {
                    rx,
                    sent: sent.clone(),
                },
                MockTransportHandle { tx: Some(tx), sent },
            )
        }
    }

    impl MockTransportHandle {
        /// Sends a raw client frame to the bridge
        pub async fn send_json(&self, raw: &str) {
            if let Some(tx) = &self.tx {
                tx.send(raw.to_string()).await.ok();
            }
        }

        /// Simulates the client dropping the connection
        pub fn disconnect(&mut self) {
            self.tx = None;
        }

        /// Frames the bridge sent so far
        pub fn sent_frames(&self) -> Vec<ServerFrame> {
            self.sent.lock().unwrap().clone()
        }

        pub fn error_frame_count(&self) -> usize {
            self.sent_frames()
                .iter()
                .filter(|f| matches!(f, ServerFrame::Error { .. }))
                .count()
        }

        /// Waits until a frame matching `predicate` has been sent
        pub async fn wait_for_frame(&self, predicate: impl Fn(&ServerFrame) -> bool) {
            for _ in 0..500 {
                if self.sent_frames().iter().any(&predicate) {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            panic!("expected frame never sent; got {:?}", self.sent_frames());
        }
    }

    #[async_trait::async_trait]
    impl ClientTransport for MockTransport {
        async fn recv(&mut self) -> Option<String> {
            self.rx.recv().await
        }

        async fn send(&mut self, frame: &ServerFrame) -> Result<(), BridgeError> {
            self.sent.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }
}
