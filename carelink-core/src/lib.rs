//! Core library for carelink
//!
//! Domain logic for the realtime voice-assistant backend: the connection
//! registry, the resumable-session store, the client↔upstream live-session
//! bridge, and the voice-notification dispatcher. Everything network-facing
//! lives behind traits; the server crate supplies the real transports.

pub mod bridge;
pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod upstream;

pub use bridge::{BridgeState, ClientTransport, LiveBridge};
pub use config::LiveConfig;
pub use error::{
    AudioError, BridgeError, CarelinkError, DispatchError, ProtocolError, SinkError, StoreError,
    UpstreamError,
};
pub use notify::{
    AudioGenerator, Classification, DispatchOutcome, NotificationDispatcher, NotificationPayload,
    URGENT_PREFIX,
};
pub use protocol::{ClientFrame, MediaChunk, NotificationReply, ServerFrame, Speaker};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSink, DeliveryReport};
pub use store::{Clock, FileSessionStore, ManualClock, MemorySessionStore, SessionStore, SystemClock};
pub use upstream::{LiveConnector, LiveSession, UpstreamEvent};
