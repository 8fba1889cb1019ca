//! Session protocol message types
//!
//! Control messages are JSON objects tagged by `type`; audio travels as binary frames in
//! both directions and is represented by [`MessageRoute::Audio`] on the way out.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::llm::AiResponse;
use crate::core::stt::WordTiming;

/// Maximum accepted length of a user identifier
pub const MAX_USER_ID_LEN: usize = 128;

/// Maximum accepted size of a single client text frame (64 KB)
pub const MAX_TEXT_FRAME_SIZE: usize = 64 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// JSON control messages sent by the client
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// Open a transcription session
    #[serde(rename = "startStream")]
    StartStream {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(default)]
        language: Option<String>,
    },

    /// Close the current session, keeping the connection
    #[serde(rename = "stopStream")]
    StopStream,

    /// Heartbeat acknowledgment
    #[serde(rename = "pong")]
    Pong,
}

/// Everything the session reacts to from the client side
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    StartStream {
        user_id: String,
        language: Option<String>,
    },
    AudioChunk(Bytes),
    StopStream,
    Pong,
}

impl From<IncomingMessage> for ClientCommand {
    fn from(message: IncomingMessage) -> Self {
        match message {
            IncomingMessage::StartStream { user_id, language } => {
                ClientCommand::StartStream { user_id, language }
            }
            IncomingMessage::StopStream => ClientCommand::StopStream,
            IncomingMessage::Pong => ClientCommand::Pong,
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// JSON control messages sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    /// Transcription stream is open; audio may be sent
    #[serde(rename = "streamReady")]
    StreamReady {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    #[serde(rename = "interimTranscript")]
    InterimTranscript {
        transcript: String,
        words: Vec<WordTiming>,
        confidence: f32,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<serde_json::Value>,
    },

    /// A final transcript and the coach's answer; synthesized audio follows
    #[serde(rename = "transcriptionComplete")]
    TranscriptionComplete {
        transcript: String,
        confidence: f32,
        words: Vec<WordTiming>,
        #[serde(rename = "aiResponse")]
        ai_response: AiResponse,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        metadata: Option<serde_json::Value>,
    },

    /// All synthesized audio for the last answer has been sent
    #[serde(rename = "audioComplete")]
    AudioComplete,

    /// Provider metadata, passed through verbatim
    #[serde(rename = "metadata")]
    Metadata {
        #[serde(flatten)]
        fields: serde_json::Map<String, serde_json::Value>,
    },

    #[serde(rename = "utteranceEnd")]
    UtteranceEnd,

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        details: Option<String>,
    },

    #[serde(rename = "reconnecting")]
    Reconnecting {
        attempt: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
    },

    #[serde(rename = "reconnected")]
    Reconnected,

    #[serde(rename = "reconnectionFailed")]
    ReconnectionFailed { message: String, code: String },

    /// Liveness probe; the client answers with `pong`
    #[serde(rename = "ping")]
    Ping,
}

impl OutgoingMessage {
    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        OutgoingMessage::Error {
            message: message.into(),
            details,
        }
    }
}

/// Routing for messages leaving the session
#[derive(Debug, Clone, PartialEq)]
pub enum MessageRoute {
    Outgoing(OutgoingMessage),
    Audio(Bytes),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::ResponseMetadata;
    use serde_json::json;

    #[test]
    fn test_parse_start_stream() {
        let message: IncomingMessage =
            serde_json::from_str(r#"{"type":"startStream","userId":"u1","language":"es"}"#)
                .unwrap();
        assert_eq!(
            message,
            IncomingMessage::StartStream {
                user_id: "u1".into(),
                language: Some("es".into())
            }
        );

        let message: IncomingMessage =
            serde_json::from_str(r#"{"type":"startStream","userId":"u1"}"#).unwrap();
        assert!(matches!(
            message,
            IncomingMessage::StartStream { language: None, .. }
        ));
    }

    #[test]
    fn test_parse_unit_messages() {
        let stop: IncomingMessage = serde_json::from_str(r#"{"type":"stopStream"}"#).unwrap();
        let pong: IncomingMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(ClientCommand::from(stop), ClientCommand::StopStream);
        assert_eq!(ClientCommand::from(pong), ClientCommand::Pong);
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"dance"}"#).is_err());
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"startStream"}"#).is_err());
    }

    #[test]
    fn test_outgoing_wire_names() {
        let cases = [
            (
                OutgoingMessage::StreamReady {
                    session_id: "s1".into(),
                },
                json!({"type": "streamReady", "sessionId": "s1"}),
            ),
            (OutgoingMessage::AudioComplete, json!({"type": "audioComplete"})),
            (OutgoingMessage::UtteranceEnd, json!({"type": "utteranceEnd"})),
            (OutgoingMessage::Ping, json!({"type": "ping"})),
            (
                OutgoingMessage::Reconnecting {
                    attempt: 2,
                    max_attempts: 3,
                },
                json!({"type": "reconnecting", "attempt": 2, "maxAttempts": 3}),
            ),
            (
                OutgoingMessage::ReconnectionFailed {
                    message: "gave up".into(),
                    code: "MAX_RECONNECT_ATTEMPTS".into(),
                },
                json!({"type": "reconnectionFailed", "message": "gave up", "code": "MAX_RECONNECT_ATTEMPTS"}),
            ),
            (
                OutgoingMessage::error("Streaming error", None),
                json!({"type": "error", "message": "Streaming error"}),
            ),
        ];

        for (message, expected) in cases {
            assert_eq!(serde_json::to_value(&message).unwrap(), expected);
        }
    }

    #[test]
    fn test_transcription_complete_shape() {
        let message = OutgoingMessage::TranscriptionComplete {
            transcript: "¿Cómo entreno piernas?".into(),
            confidence: 0.5,
            words: vec![],
            ai_response: AiResponse {
                text: "Sentadillas".into(),
                metadata: ResponseMetadata {
                    model: "m".into(),
                    kind: "fitness_response".into(),
                },
            },
            metadata: None,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "transcriptionComplete");
        assert_eq!(value["aiResponse"]["text"], "Sentadillas");
        assert_eq!(value["aiResponse"]["metadata"]["type"], "fitness_response");
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_metadata_is_flattened() {
        let mut fields = serde_json::Map::new();
        fields.insert("request_id".into(), json!("abc"));
        let value = serde_json::to_value(OutgoingMessage::Metadata { fields }).unwrap();
        assert_eq!(value, json!({"type": "metadata", "request_id": "abc"}));
    }
}
