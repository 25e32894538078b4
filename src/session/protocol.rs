//! JSON messages exchanged with WebSocket clients.

use crate::error::SetupError;
use crate::streaming::frame::AnalysisResult;
use serde::{Deserialize, Serialize};

/// Identity block carried by every setup message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// First message on a connection, selecting what the session does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SetupMessage {
    /// Live conversation analysis
    SendConversation {
        #[serde(default)]
        user_info: UserInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Voice enrollment
    RegisterVoice {
        #[serde(default)]
        user_info: UserInfo,
    },
}

const KNOWN_EVENTS: [&str; 2] = ["send_conversation", "register_voice"];

impl SetupMessage {
    /// Parse and validate a setup frame.
    ///
    /// Anything outside the known events, or without a non-empty `user_id`,
    /// is rejected here so the session never starts streaming.
    pub fn parse(text: &str) -> Result<Self, SetupError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| SetupError::Malformed(e.to_string()))?;

        let event = match value.get("event") {
            None | Some(serde_json::Value::Null) => return Err(SetupError::MissingEvent),
            Some(serde_json::Value::String(event)) => event.as_str(),
            Some(other) => return Err(SetupError::UnknownEvent(other.to_string())),
        };
        if !KNOWN_EVENTS.contains(&event) {
            return Err(SetupError::UnknownEvent(event.to_string()));
        }

        let message: SetupMessage =
            serde_json::from_value(value).map_err(|e| SetupError::Malformed(e.to_string()))?;
        match message.user_id() {
            Some(id) if !id.trim().is_empty() => Ok(message),
            _ => Err(SetupError::MissingIdentity),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            SetupMessage::SendConversation { .. } => "send_conversation",
            SetupMessage::RegisterVoice { .. } => "register_voice",
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            SetupMessage::SendConversation { user_info, .. }
            | SetupMessage::RegisterVoice { user_info } => user_info.user_id.as_deref(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Setup acknowledgement for a conversation session
    SendConversation {
        status: &'static str,
        session_id: String,
    },
    /// Setup acknowledgement for an enrollment session
    RegisterVoice {
        status: &'static str,
        session_id: String,
    },
    /// Ordered per-chunk analysis result
    EmotionAnalysis(AnalysisResult),
}

impl ServerMessage {
    pub fn ack(setup: &SetupMessage, session_id: &str) -> Self {
        let session_id = session_id.to_string();
        match setup {
            SetupMessage::SendConversation { .. } => ServerMessage::SendConversation {
                status: "ok",
                session_id,
            },
            SetupMessage::RegisterVoice { .. } => ServerMessage::RegisterVoice {
                status: "ok",
                session_id,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Client closed the connection.
    Closed,
    /// Transport failure.
    Error(String),
}

/// Frame for the transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close { code: u16, reason: String },
}

impl From<AnalysisResult> for Outbound {
    fn from(result: AnalysisResult) -> Self {
        Outbound::Message(ServerMessage::EmotionAnalysis(result))
    }
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Outbound::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionAnalysis;

    #[test]
    fn parses_send_conversation() {
        let msg = SetupMessage::parse(
            r#"{"event":"send_conversation","user_info":{"user_id":"u1"}}"#,
        )
        .unwrap();
        assert_eq!(msg.event(), "send_conversation");
        assert_eq!(msg.user_id(), Some("u1"));
    }

    #[test]
    fn parses_register_voice_and_ignores_extra_fields() {
        let msg = SetupMessage::parse(
            r#"{"event":"register_voice","user_info":{"user_id":"u2","user_name":"Bo"},"extra":1}"#,
        )
        .unwrap();
        assert_eq!(msg.event(), "register_voice");
        assert_eq!(msg.user_id(), Some("u2"));
    }

    #[test]
    fn topic_is_optional() {
        let msg = SetupMessage::parse(
            r#"{"event":"send_conversation","user_info":{"user_id":"u1"},"topic":"weekly"}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            SetupMessage::SendConversation { topic: Some(ref t), .. } if t == "weekly"
        ));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let err = SetupMessage::parse(r#"{"event":"login","user_info":{"user_id":"u1"}}"#)
            .unwrap_err();
        assert_eq!(err, SetupError::UnknownEvent("login".to_string()));
        assert_eq!(err.to_string(), "Unknown event: login");
    }

    #[test]
    fn missing_identity_is_rejected() {
        for text in [
            r#"{"event":"send_conversation"}"#,
            r#"{"event":"send_conversation","user_info":{}}"#,
            r#"{"event":"send_conversation","user_info":{"user_id":"  "}}"#,
        ] {
            assert_eq!(
                SetupMessage::parse(text).unwrap_err(),
                SetupError::MissingIdentity,
                "input: {}",
                text
            );
        }
    }

    #[test]
    fn malformed_and_missing_event() {
        assert!(matches!(
            SetupMessage::parse("not json"),
            Err(SetupError::Malformed(_))
        ));
        assert_eq!(
            SetupMessage::parse(r#"{"user_info":{"user_id":"u1"}}"#).unwrap_err(),
            SetupError::MissingEvent
        );
        assert!(matches!(
            SetupMessage::parse(r#"{"event":7}"#),
            Err(SetupError::UnknownEvent(_))
        ));
    }

    #[test]
    fn setup_roundtrip() {
        let msg = SetupMessage::RegisterVoice {
            user_info: UserInfo {
                user_id: Some("u9".into()),
            },
        };
        let json = msg.to_json().unwrap();
        assert_eq!(SetupMessage::parse(&json).unwrap(), msg);
    }

    #[test]
    fn ack_format() {
        let setup = SetupMessage::parse(
            r#"{"event":"send_conversation","user_info":{"user_id":"u1"}}"#,
        )
        .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::ack(&setup, "abc").to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event":"send_conversation","status":"ok","session_id":"abc"})
        );
    }

    #[test]
    fn result_frame_format() {
        let outbound: Outbound = AnalysisResult {
            sequence: 2,
            transcript: "hi".into(),
            emotion: EmotionAnalysis::neutral(),
            is_same: None,
            similarity: None,
        }
        .into();
        let Outbound::Message(message) = outbound else {
            panic!("expected a message frame");
        };
        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "emotion_analysis");
        assert_eq!(json["sequence"], 2);
        assert_eq!(json["transcript"], "hi");
        assert!(json["is_same"].is_null());
        assert!(json["similarity"].is_null());
        assert_eq!(json["emotion"]["audio"]["dominant"], "neutral");
        assert_eq!(json["emotion"]["text"]["standard"], "neutral");
    }
}
