//! Wire frames exchanged with client devices
//!
//! Inbound frames are keyed by which top-level JSON field is present rather
//! than a tag, so parsing inspects a `serde_json::Value`. Outbound frames
//! serialize to the exact shapes the mobile clients already consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::notify::NotificationPayload;

/// A single media chunk from the client (audio or video frame)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded chunk bytes
    pub data: String,
}

/// Who produced a transcription line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    User,
    Assistant,
}

/// Frames received from a client device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Session configuration, must be the first frame
    Setup(serde_json::Value),
    /// Streamed media input
    RealtimeInput { media_chunks: Vec<MediaChunk> },
    /// Plain text input
    Text { text: String },
    /// Liveness probe, not conversational activity
    Keepalive,
    /// In-session request to synthesize and broadcast a voice notification
    VoiceNotificationRequest {
        text: String,
        notification_type: Option<String>,
        request_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RealtimeInputBody {
    #[serde(default)]
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Deserialize)]
struct VoiceNotificationBody {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "notificationType", alias = "type")]
    notification_type: Option<String>,
    #[serde(default, alias = "requestId")]
    request_id: Option<String>,
}

impl ClientFrame {
    /// Parse a raw text frame from the client
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.get("type").and_then(|t| t.as_str()) == Some("keepalive") {
            return Ok(ClientFrame::Keepalive);
        }
        if let Some(setup) = value.get("setup") {
            return Ok(ClientFrame::Setup(setup.clone()));
        }
        if let Some(input) = value.get("realtime_input") {
            let body: RealtimeInputBody = serde_json::from_value(input.clone())?;
            return Ok(ClientFrame::RealtimeInput {
                media_chunks: body.media_chunks,
            });
        }
        if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
            return Ok(ClientFrame::Text {
                text: text.to_string(),
            });
        }
        if let Some(request) = value.get("voice_notification_request") {
            let body: VoiceNotificationBody = serde_json::from_value(request.clone())?;
            return Ok(ClientFrame::VoiceNotificationRequest {
                text: body.text,
                notification_type: body.notification_type,
                request_id: body.request_id,
            });
        }

        Err(ProtocolError::UnknownFrame)
    }

    /// Whether this frame counts as conversational activity for the idle timer
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            ClientFrame::RealtimeInput { .. } | ClientFrame::Text { .. }
        )
    }
}

/// Transcription fragment relayed to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptionBody {
    pub text: String,
    pub sender: Speaker,
    pub finished: bool,
}

/// Outcome of an in-session voice-notification request
#[derive(Debug)]
pub enum NotificationReply {
    Delivered { payload: NotificationPayload },
    Failed { message: String },
}

/// Frames sent to a client device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Audio {
        /// Base64-encoded audio chunk
        audio: String,
    },
    Text {
        text: String,
    },
    Transcription {
        transcription: TranscriptionBody,
    },
    Interrupted {
        interrupted: bool,
    },
    Keepalive {
        #[serde(rename = "type")]
        msg_type: &'static str,
        timestamp: DateTime<Utc>,
    },
    Error {
        #[serde(rename = "type")]
        msg_type: &'static str,
        message: String,
    },
    VoiceNotification {
        #[serde(rename = "type")]
        msg_type: &'static str,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<NotificationPayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        broadcast: Option<bool>,
    },
}

impl ServerFrame {
    pub fn audio(data: impl Into<String>) -> Self {
        ServerFrame::Audio { audio: data.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ServerFrame::Text { text: text.into() }
    }

    pub fn transcription(text: impl Into<String>, sender: Speaker, finished: bool) -> Self {
        ServerFrame::Transcription {
            transcription: TranscriptionBody {
                text: text.into(),
                sender,
                finished,
            },
        }
    }

    pub fn interrupted() -> Self {
        ServerFrame::Interrupted { interrupted: true }
    }

    pub fn keepalive() -> Self {
        ServerFrame::Keepalive {
            msg_type: "keepalive",
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            msg_type: "error",
            message: message.into(),
        }
    }

    /// Envelope broadcast to every connected client
    pub fn notification_broadcast(payload: NotificationPayload) -> Self {
        ServerFrame::VoiceNotification {
            msg_type: "voice_notification_response",
            success: true,
            data: Some(payload),
            error: None,
            request_id: None,
            broadcast: Some(true),
        }
    }

    /// Direct reply to an in-session voice-notification request
    pub fn notification_reply(request_id: Option<String>, reply: NotificationReply) -> Self {
        match reply {
            NotificationReply::Delivered { payload } => ServerFrame::VoiceNotification {
                msg_type: "voice_notification_response",
                success: true,
                data: Some(payload),
                error: None,
                request_id,
                broadcast: None,
            },
            NotificationReply::Failed { message } => ServerFrame::VoiceNotification {
                msg_type: "voice_notification_response",
                success: false,
                data: None,
                error: Some(message),
                request_id,
                broadcast: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup_frame() {
        let frame = ClientFrame::parse(r#"{"setup": {"model": "live-audio"}}"#).unwrap();
        match frame {
            ClientFrame::Setup(config) => {
                assert_eq!(config["model"], "live-audio");
            }
            other => panic!("expected setup, got {other:?}"),
        }
    }

    #[test]
    fn parse_realtime_input_with_chunks() {
        let raw = r#"{"realtime_input": {"media_chunks": [
            {"mime_type": "audio/pcm", "data": "AAAA"},
            {"mime_type": "image/jpeg", "data": "BBBB"}
        ]}}"#;
        let frame = ClientFrame::parse(raw).unwrap();
        match frame {
            ClientFrame::RealtimeInput { media_chunks } => {
                assert_eq!(media_chunks.len(), 2);
                assert_eq!(media_chunks[0].mime_type, "audio/pcm");
                assert_eq!(media_chunks[1].data, "BBBB");
            }
            other => panic!("expected realtime input, got {other:?}"),
        }
    }

    #[test]
    fn parse_text_frame() {
        let frame = ClientFrame::parse(r#"{"text": "xin chào"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Text {
                text: "xin chào".to_string()
            }
        );
    }

    #[test]
    fn parse_keepalive_frame() {
        let frame = ClientFrame::parse(r#"{"type": "keepalive"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Keepalive);
        assert!(!frame.is_activity());
    }

    #[test]
    fn parse_voice_notification_request() {
        let raw = r#"{"voice_notification_request": {
            "text": "uống thuốc", "notificationType": "urgent", "requestId": "r1"
        }}"#;
        let frame = ClientFrame::parse(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::VoiceNotificationRequest {
                text: "uống thuốc".to_string(),
                notification_type: Some("urgent".to_string()),
                request_id: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn unknown_frame_is_an_error() {
        let result = ClientFrame::parse(r#"{"unexpected": 1}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownFrame)));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let result = ClientFrame::parse("not json");
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn data_frames_count_as_activity() {
        assert!(ClientFrame::Text {
            text: "hi".to_string()
        }
        .is_activity());
        assert!(ClientFrame::RealtimeInput {
            media_chunks: vec![]
        }
        .is_activity());
        assert!(!ClientFrame::Setup(serde_json::json!({})).is_activity());
    }

    #[test]
    fn audio_frame_serializes_flat() {
        let json = serde_json::to_value(ServerFrame::audio("QUJD")).unwrap();
        assert_eq!(json, serde_json::json!({"audio": "QUJD"}));
    }

    #[test]
    fn transcription_frame_shape() {
        let frame = ServerFrame::transcription("chào bà", Speaker::Assistant, false);
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "transcription": {"text": "chào bà", "sender": "Assistant", "finished": false}
            })
        );
    }

    #[test]
    fn keepalive_frame_carries_type_and_timestamp() {
        let json = serde_json::to_value(ServerFrame::keepalive()).unwrap();
        assert_eq!(json["type"], "keepalive");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn error_frame_shape() {
        let json = serde_json::to_value(ServerFrame::error("session ended")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "message": "session ended"})
        );
    }

    #[test]
    fn notification_reply_failure_omits_data() {
        let frame = ServerFrame::notification_reply(
            Some("r1".to_string()),
            NotificationReply::Failed {
                message: "generation failed".to_string(),
            },
        );
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(json["type"], "voice_notification_response");
        assert_eq!(json["success"], false);
        assert_eq!(json["request_id"], "r1");
        assert_eq!(json["error"], "generation failed");
        assert!(json.get("data").is_none());
        assert!(json.get("broadcast").is_none());
    }
}
