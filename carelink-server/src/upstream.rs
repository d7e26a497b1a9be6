//! Connector for the generative live API
//!
//! Speaks the live API's bidirectional WebSocket JSON: a setup message
//! (optionally carrying a resumption handle), then streamed server content
//! mapped onto `UpstreamEvent`s. Also provides the one-shot audio generator
//! used for voice notifications.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use carelink_core::{
    AudioError, AudioGenerator, LiveConnector, LiveSession, MediaChunk, Speaker, UpstreamError,
    UpstreamEvent,
};

const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const ASSISTANT_INSTRUCTION: &str = "Bạn là trợ lý chăm sóc sức khỏe cho người cao tuổi. \
Trả lời ngắn gọn, rõ ràng, thân thiện bằng tiếng Việt.";

const NOTIFIER_INSTRUCTION: &str = "Đọc to nguyên văn thông báo sau bằng giọng rõ ràng, \
chậm rãi, không thêm lời nào khác.";

/// Settings for one upstream profile
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub language_code: String,
    pub system_instruction: String,
}

impl UpstreamConfig {
    /// Conversational profile used by live bridges
    pub fn assistant(api_key: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_LIVE_URL.to_string(),
            api_key: api_key.into(),
            model: "gemini-live-2.5-flash-preview".to_string(),
            voice: "Aoede".to_string(),
            language_code: "vi-VN".to_string(),
            system_instruction: ASSISTANT_INSTRUCTION.to_string(),
        }
    }

    /// Text-to-speech profile used for voice notifications
    pub fn notifier(api_key: impl Into<String>) -> Self {
        Self {
            system_instruction: NOTIFIER_INSTRUCTION.to_string(),
            ..Self::assistant(api_key)
        }
    }

    fn endpoint(&self) -> String {
        format!("{}?key={}", self.url, self.api_key)
    }

    fn setup_message(&self, resume_handle: Option<&str>) -> serde_json::Value {
        let mut setup = json!({
            "model": format!("models/{}", self.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": self.voice}},
                    "languageCode": self.language_code,
                },
            },
            "systemInstruction": {"parts": [{"text": self.system_instruction}]},
            "outputAudioTranscription": {},
            "inputAudioTranscription": {},
            "sessionResumption": {},
        });
        if let Some(handle) = resume_handle {
            setup["sessionResumption"] = json!({"handle": handle});
        }
        json!({"setup": setup})
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `LiveConnector` backed by the real live API
pub struct LiveApiConnector {
    config: UpstreamConfig,
}

impl LiveApiConnector {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for LiveApiConnector {
    async fn connect(
        &self,
        resume_handle: Option<String>,
    ) -> Result<Box<dyn LiveSession>, UpstreamError> {
        let (stream, _) = connect_async(self.config.endpoint())
            .await
            .map_err(|e| UpstreamError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let setup = self.config.setup_message(resume_handle.as_deref());
        write
            .send(Message::Text(setup.to_string().into()))
            .await
            .map_err(|e| UpstreamError::ConnectFailed(e.to_string()))?;

        // the first server message must be the setup acknowledgement
        let ack = wait_for_setup_ack(&mut read).await?;
        debug!("Upstream session established: {ack}");

        let (tx, _) = broadcast::channel(256);
        let reader_tx = tx.clone();
        tokio::spawn(read_loop(read, reader_tx));

        Ok(Box::new(ApiLiveSession { write, tx }))
    }
}

async fn wait_for_setup_ack(
    read: &mut SplitStream<WsStream>,
) -> Result<serde_json::Value, UpstreamError> {
    loop {
        let msg = read
            .next()
            .await
            .ok_or_else(|| UpstreamError::ConnectFailed("closed before setup ack".to_string()))?
            .map_err(|e| UpstreamError::ConnectFailed(e.to_string()))?;
        let Some(value) = message_json(&msg) else {
            continue;
        };
        if let Some(ack) = value.get("setupComplete") {
            return Ok(ack.clone());
        }
        if let Some(error) = value.get("error") {
            return Err(UpstreamError::ConnectFailed(error.to_string()));
        }
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, tx: broadcast::Sender<UpstreamEvent>) {
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Upstream read error: {e}");
                let _ = tx.send(UpstreamEvent::Closed {
                    reason: Some(e.to_string()),
                });
                return;
            }
        };
        if let Message::Close(frame) = &msg {
            debug!("Upstream sent close frame: {frame:?}");
            break;
        }
        let Some(value) = message_json(&msg) else {
            continue;
        };
        for event in events_from(&value) {
            if tx.send(event).is_err() {
                // all bridges gone
                return;
            }
        }
    }
    let _ = tx.send(UpstreamEvent::Closed { reason: None });
}

fn message_json(msg: &Message) -> Option<serde_json::Value> {
    let parsed = match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()),
        Message::Binary(bytes) => serde_json::from_slice(bytes),
        _ => return None,
    };
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Unparseable upstream message: {e}");
            None
        }
    }
}

/// Maps one server message onto the events it carries, in the order the
/// original relay emitted them
fn events_from(value: &serde_json::Value) -> Vec<UpstreamEvent> {
    let mut events = Vec::new();

    if let Some(update) = value.get("sessionResumptionUpdate") {
        let resumable = update
            .get("resumable")
            .and_then(|r| r.as_bool())
            .unwrap_or(false);
        if let Some(handle) = update.get("newHandle").and_then(|h| h.as_str()) {
            if resumable && !handle.is_empty() {
                events.push(UpstreamEvent::ResumptionUpdate {
                    handle: handle.to_string(),
                });
            }
        }
    }

    if value.get("goAway").is_some() {
        events.push(UpstreamEvent::GoAway);
    }

    let Some(content) = value.get("serverContent") else {
        return events;
    };

    if content.get("interrupted").is_some_and(|i| !i.is_null()) {
        events.push(UpstreamEvent::Interrupted);
    }

    for (key, sender) in [
        ("outputTranscription", Speaker::Assistant),
        ("inputTranscription", Speaker::User),
    ] {
        if let Some(transcription) = content.get(key) {
            let text = transcription
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            let finished = transcription
                .get("finished")
                .and_then(|f| f.as_bool())
                .unwrap_or(false);
            if !text.is_empty() || finished {
                events.push(UpstreamEvent::Transcription {
                    text: text.to_string(),
                    sender,
                    finished,
                });
            }
        }
    }

    if let Some(parts) = content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                events.push(UpstreamEvent::Text {
                    text: text.to_string(),
                });
            }
            if let Some(data) = part
                .get("inlineData")
                .and_then(|d| d.get("data"))
                .and_then(|d| d.as_str())
            {
                events.push(UpstreamEvent::Audio {
                    data: data.to_string(),
                });
            }
        }
    }

    if content
        .get("turnComplete")
        .and_then(|t| t.as_bool())
        .unwrap_or(false)
    {
        events.push(UpstreamEvent::TurnComplete);
    }

    events
}

struct ApiLiveSession {
    write: SplitSink<WsStream, Message>,
    tx: broadcast::Sender<UpstreamEvent>,
}

impl ApiLiveSession {
    async fn send_json(&mut self, value: serde_json::Value) -> Result<(), UpstreamError> {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl LiveSession for ApiLiveSession {
    async fn send_text(&mut self, text: &str) -> Result<(), UpstreamError> {
        self.send_json(json!({
            "clientContent": {
                "turns": [{"role": "user", "parts": [{"text": text}]}],
                "turnComplete": true,
            }
        }))
        .await
    }

    async fn send_media(&mut self, chunk: MediaChunk) -> Result<(), UpstreamError> {
        self.send_json(json!({
            "realtimeInput": {
                "mediaChunks": [{"mimeType": chunk.mime_type, "data": chunk.data}],
            }
        }))
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.tx.subscribe()
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))
    }
}

/// How long the notification generator waits for each audio chunk
const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Synthesizes notification audio through a one-shot upstream session
pub struct LiveAudioGenerator {
    connector: std::sync::Arc<dyn LiveConnector>,
}

impl LiveAudioGenerator {
    pub fn new(connector: std::sync::Arc<dyn LiveConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl AudioGenerator for LiveAudioGenerator {
    async fn generate(&self, text: &str) -> Result<String, AudioError> {
        let mut session = self
            .connector
            .connect(None)
            .await
            .map_err(|e| AudioError::Generation(e.to_string()))?;
        let mut events = session.subscribe();

        session
            .send_text(text)
            .await
            .map_err(|e| AudioError::Generation(e.to_string()))?;

        let mut pcm = Vec::new();
        loop {
            let event = tokio::time::timeout(GENERATION_TIMEOUT, events.recv())
                .await
                .map_err(|_| AudioError::Generation("timed out waiting for audio".to_string()))?;
            match event {
                Ok(UpstreamEvent::Audio { data }) => {
                    let chunk = BASE64
                        .decode(data.as_bytes())
                        .map_err(|e| AudioError::Generation(e.to_string()))?;
                    pcm.extend_from_slice(&chunk);
                }
                Ok(UpstreamEvent::TurnComplete) => break,
                Ok(UpstreamEvent::Closed { reason }) => {
                    if pcm.is_empty() {
                        let reason = reason.unwrap_or_else(|| "session closed".to_string());
                        return Err(AudioError::Generation(reason));
                    }
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        if let Err(e) = session.close().await {
            debug!("Failed to close generation session: {e}");
        }

        if pcm.is_empty() {
            return Err(AudioError::Generation("no audio produced".to_string()));
        }
        Ok(BASE64.encode(pcm))
    }
}
