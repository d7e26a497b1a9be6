//! Traits for the upstream generative live-session collaborator
//!
//! The bridge only sees these traits; the server crate provides the real
//! connector and `MockLiveConnector` drives the tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::UpstreamError;
use crate::protocol::{MediaChunk, Speaker};

/// Events emitted by an open upstream session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Base64-encoded audio chunk from the model
    Audio { data: String },
    /// Text fragment from the model
    Text { text: String },
    /// Transcription of either side of the conversation
    Transcription {
        text: String,
        sender: Speaker,
        finished: bool,
    },
    /// The model was interrupted by new user input
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The upstream will close soon; a resumption update usually follows
    GoAway,
    /// A fresh resumption handle; supersedes any earlier one
    ResumptionUpdate { handle: String },
    /// The session ended. `Some(reason)` marks an error close.
    Closed { reason: Option<String> },
}

/// An open bidirectional session with the upstream model
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError>;

    async fn send_media(&mut self, chunk: MediaChunk) -> Result<(), UpstreamError>;

    /// Subscribe to session events. Every subscriber sees every event.
    fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent>;

    async fn close(&mut self) -> Result<(), UpstreamError>;
}

/// Factory opening upstream sessions, fresh or resumed
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Opens a session. `resume_handle` continues a previous session's
    /// context; `None` starts fresh. Returns once the upstream acknowledges.
    async fn connect(
        &self,
        resume_handle: Option<String>,
    ) -> Result<Box<dyn LiveSession>, UpstreamError>;
}

pub use mock::{MockInput, MockLiveConnector};

pub mod mock {
    //! Scripted upstream for tests

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    use super::*;

    /// Input the bridge forwarded to the mock session
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockInput {
        Text(String),
        Media(MediaChunk),
    }

    struct MockShared {
        tx: broadcast::Sender<UpstreamEvent>,
        connects: StdMutex<Vec<Option<String>>>,
        sent: StdMutex<Vec<MockInput>>,
        fail_connect: AtomicBool,
        subscribers: AtomicUsize,
        closed: AtomicBool,
    }

    /// Connector whose sessions are driven by the test via `emit`
    #[derive(Clone)]
    pub struct MockLiveConnector {
        shared: Arc<MockShared>,
    }

    impl MockLiveConnector {
        pub fn new() -> Self {
            let (tx, _) = broadcast::channel(64);
            Self {
                shared: Arc::new(MockShared {
                    tx,
                    connects: StdMutex::new(Vec::new()),
                    sent: StdMutex::new(Vec::new()),
                    fail_connect: AtomicBool::new(false),
                    subscribers: AtomicUsize::new(0),
                    closed: AtomicBool::new(false),
                }),
            }
        }

        /// Makes subsequent `connect` calls fail
        pub fn set_fail_connect(&self, fail: bool) {
            self.shared.fail_connect.store(fail, Ordering::SeqCst);
        }

        /// Pushes an event to every subscribed session receiver
        pub fn emit(&self, event: UpstreamEvent) {
            let _ = self.shared.tx.send(event);
        }

        /// Resume handles passed to `connect`, in call order
        pub fn connect_handles(&self) -> Vec<Option<String>> {
            self.shared.connects.lock().unwrap().clone()
        }

        /// Everything the bridge forwarded upstream, in order
        pub fn sent_inputs(&self) -> Vec<MockInput> {
            self.shared.sent.lock().unwrap().clone()
        }

        pub fn close_called(&self) -> bool {
            self.shared.closed.load(Ordering::SeqCst)
        }

        /// Waits until a session has subscribed, so emitted events are not
        /// lost to a not-yet-created receiver
        pub async fn wait_subscribed(&self) {
            for _ in 0..200 {
                if self.shared.subscribers.load(Ordering::SeqCst) > 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no session subscribed");
        }
    }

    impl Default for MockLiveConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LiveConnector for MockLiveConnector {
        async fn connect(
            &self,
            resume_handle: Option<String>,
        ) -> Result<Box<dyn LiveSession>, UpstreamError> {
            self.shared
                .connects
                .lock()
                .unwrap()
                .push(resume_handle.clone());
            if self.shared.fail_connect.load(Ordering::SeqCst) {
                return Err(UpstreamError::ConnectFailed(
                    "mock connect failure".to_string(),
                ));
            }
            Ok(Box::new(MockLiveSession {
                shared: self.shared.clone(),
            }))
        }
    }

    struct MockLiveSession {
        shared: Arc<MockShared>,
    }

    #[async_trait]
    impl LiveSession for MockLiveSession {
        async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError> {
            self.shared
                .sent
                .lock()
                .unwrap()
                .push(MockInput::Text(text.to_string()));
            Ok(())
        }

        async fn send_media(&mut self, chunk: MediaChunk) -> Result<(), UpstreamError> {
            self.shared.sent.lock().unwrap().push(MockInput::Media(chunk));
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
            self.shared.subscribers.fetch_add(1, Ordering::SeqCst);
            self.shared.tx.subscribe()
        }

        async fn close(&mut self) -> Result<(), UpstreamError> {
            self.shared.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
