//! Voice notification synthesis and fan-out

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AudioError, DispatchError};
use crate::registry::ConnectionRegistry;

/// Prefix spoken before urgent notifications
pub const URGENT_PREFIX: &str = "THÔNG BÁO KHẨN CẤP: ";

/// Notification urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    #[serde(alias = "info")]
    Normal,
    #[serde(alias = "emergency")]
    Urgent,
}

/// Synthesized voice payload handed to the registry for broadcast
///
/// Field names are camelCase because the mobile clients consume them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification_text: String,
    /// Base64-encoded synthesized audio
    pub audio_base64: String,
    pub audio_format: String,
    pub notification_type: Classification,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(
        text: impl Into<String>,
        audio_base64: impl Into<String>,
        classification: Classification,
    ) -> Self {
        Self {
            notification_text: text.into(),
            audio_base64: audio_base64.into(),
            audio_format: "audio/pcm".to_string(),
            notification_type: classification,
            timestamp: Utc::now(),
        }
    }
}

/// Synthesizes speech for a text, returning base64 audio
#[async_trait]
pub trait AudioGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<String, AudioError>;
}

/// Result of a dispatch: generation outcome plus delivery counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub generated: bool,
    pub delivered: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Turns a notification request into a broadcast voice payload
pub struct NotificationDispatcher {
    generator: Arc<dyn AudioGenerator>,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationDispatcher {
    pub fn new(generator: Arc<dyn AudioGenerator>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            generator,
            registry,
        }
    }

    /// Synthesizes `text` and broadcasts the result to every connection
    ///
    /// Empty text is a validation error. A generation failure is reported in
    /// the outcome with no broadcast attempted; partial delivery failures do
    /// not change the generation result.
    pub async fn dispatch(
        &self,
        text: &str,
        classification: Classification,
    ) -> Result<DispatchOutcome, DispatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DispatchError::EmptyText);
        }

        let spoken = match classification {
            Classification::Urgent => format!("{URGENT_PREFIX}{text}"),
            Classification::Normal => text.to_string(),
        };

        let audio = match self.generator.generate(&spoken).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Voice generation failed for notification: {e}");
                return Ok(DispatchOutcome {
                    generated: false,
                    delivered: 0,
                    failed: 0,
                    error: Some(e.to_string()),
                });
            }
        };

        let payload = NotificationPayload::new(text, audio, classification);
        let report = self.registry.broadcast(&payload).await;
        info!(
            "Voice notification delivered to {} connection(s), {} failed",
            report.delivered, report.failed
        );

        Ok(DispatchOutcome {
            generated: true,
            delivered: report.delivered,
            failed: report.failed,
            error: None,
        })
    }
}

pub use mock::MockAudioGenerator;

pub mod mock {
    //! Scripted audio generator for tests

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use super::*;

    pub struct MockAudioGenerator {
        fail: AtomicBool,
        audio: String,
        calls: StdMutex<Vec<String>>,
    }

    impl MockAudioGenerator {
        pub fn new(audio: impl Into<String>) -> Self {
            Self {
                fail: AtomicBool::new(false),
                audio: audio.into(),
                calls: StdMutex::new(Vec::new()),
            }
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Texts passed to `generate`, in call order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioGenerator for MockAudioGenerator {
        async fn generate(&self, text: &str) -> Result<String, AudioError> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail.load(Ordering::SeqCst) {
                return Err(AudioError::Generation("mock generation failure".to_string()));
            }
            Ok(self.audio.clone())
        }
    }
}
