//! Control-channel wire types.
//!
//! Every frame on the control channel is one [`ControlMessage`]:
//!
//! ```json
//! { "kind": "join", "timestamp": 1700000000000, "payload": "{\"username\":\"Alice\"}" }
//! ```
//!
//! `payload` is an opaque string holding the JSON encoding of the
//! kind-specific body. [`ControlBody`] is the typed view of a message and is
//! what the server and client actually match on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A unique identifier for a session participant.
///
/// Ids come from a monotonic counter owned by the session registry and are
/// never reused. On the wire it is a plain number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// The display name used when a participant joins without a username.
    pub fn fallback_name(self) -> String {
        format!("User{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Discriminates the control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Client → Server: ask to be admitted into the session.
    Join,
    /// Server → Client: admitted; carries id, data port and member count.
    JoinAccepted,
    /// Server → Client: refused; the server closes the connection next.
    JoinRejected,
    /// Client → Server: leaving the session. Empty payload.
    Leave,
    /// Server → Client: someone else joined.
    ParticipantJoined,
    /// Server → Client: someone else left.
    ParticipantLeft,
    /// Client → Server: my UDP socket is ready on this port.
    AudioReady,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Join => "join",
            Self::JoinAccepted => "join_accepted",
            Self::JoinRejected => "join_rejected",
            Self::Leave => "leave",
            Self::ParticipantJoined => "participant_joined",
            Self::ParticipantLeft => "participant_left",
            Self::AudioReady => "audio_ready",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of [`MessageKind::Join`].
///
/// Every field is optional on the wire. A missing password is treated as
/// the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub session_name: Option<String>,
}

impl JoinRequest {
    /// The username exactly as sent, if it has any non-whitespace content.
    pub fn username(&self) -> Option<&str> {
        self.username
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    /// The supplied password, or `""` when absent.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

/// Payload of [`MessageKind::JoinAccepted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAccepted {
    pub assigned_id: ParticipantId,
    /// The server's UDP port for audio datagrams.
    pub data_port: u16,
    /// Members in the session, including the one just admitted.
    pub participant_count: usize,
}

/// Payload of [`MessageKind::JoinRejected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRejected {
    pub reason_text: String,
}

/// Payload of [`MessageKind::AudioReady`].
///
/// Only `data_port` is acted on. The format hints describe what the client
/// captures and are passed through for peers that care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioReady {
    pub data_port: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
}

impl AudioReady {
    /// Creates an audio-ready payload with the default format hints.
    pub fn new(data_port: u16) -> Self {
        Self {
            data_port,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bits_per_sample: default_bits_per_sample(),
        }
    }
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    2
}

fn default_bits_per_sample() -> u16 {
    24
}

/// Payload of [`MessageKind::ParticipantJoined`] and
/// [`MessageKind::ParticipantLeft`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantNotice {
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// ControlBody — typed view
// ---------------------------------------------------------------------------

/// A control message with its payload decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlBody {
    Join(JoinRequest),
    JoinAccepted(JoinAccepted),
    JoinRejected(JoinRejected),
    Leave,
    ParticipantJoined(ParticipantNotice),
    ParticipantLeft(ParticipantNotice),
    AudioReady(AudioReady),
}

impl ControlBody {
    /// The wire discriminant for this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Join(_) => MessageKind::Join,
            Self::JoinAccepted(_) => MessageKind::JoinAccepted,
            Self::JoinRejected(_) => MessageKind::JoinRejected,
            Self::Leave => MessageKind::Leave,
            Self::ParticipantJoined(_) => MessageKind::ParticipantJoined,
            Self::ParticipantLeft(_) => MessageKind::ParticipantLeft,
            Self::AudioReady(_) => MessageKind::AudioReady,
        }
    }

    fn encode_payload(&self) -> Result<String, ProtocolError> {
        let json = match self {
            Self::Join(p) => serde_json::to_string(p),
            Self::JoinAccepted(p) => serde_json::to_string(p),
            Self::JoinRejected(p) => serde_json::to_string(p),
            Self::Leave => return Ok(String::new()),
            Self::ParticipantJoined(p) | Self::ParticipantLeft(p) => {
                serde_json::to_string(p)
            }
            Self::AudioReady(p) => serde_json::to_string(p),
        };
        json.map_err(ProtocolError::Encode)
    }
}

// ---------------------------------------------------------------------------
// ControlMessage — the frame
// ---------------------------------------------------------------------------

/// One frame on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: MessageKind,
    /// Unix epoch milliseconds at the sender.
    pub timestamp: i64,
    /// JSON encoding of the kind-specific body; empty for `leave`.
    #[serde(default)]
    pub payload: String,
}

impl ControlMessage {
    /// Builds a message stamped with the current wall-clock time.
    pub fn from_body(body: &ControlBody) -> Result<Self, ProtocolError> {
        Self::with_timestamp(body, chrono::Utc::now().timestamp_millis())
    }

    /// Builds a message with an explicit timestamp.
    pub fn with_timestamp(
        body: &ControlBody,
        timestamp: i64,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: body.kind(),
            timestamp,
            payload: body.encode_payload()?,
        })
    }

    /// Decodes the payload according to `kind`.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the payload doesn't match the
    /// shape required by the kind.
    pub fn body(&self) -> Result<ControlBody, ProtocolError> {
        let body = match self.kind {
            MessageKind::Join => ControlBody::Join(self.payload_as()?),
            MessageKind::JoinAccepted => {
                ControlBody::JoinAccepted(self.payload_as()?)
            }
            MessageKind::JoinRejected => {
                ControlBody::JoinRejected(self.payload_as()?)
            }
            MessageKind::Leave => ControlBody::Leave,
            MessageKind::ParticipantJoined => {
                ControlBody::ParticipantJoined(self.payload_as()?)
            }
            MessageKind::ParticipantLeft => {
                ControlBody::ParticipantLeft(self.payload_as()?)
            }
            MessageKind::AudioReady => ControlBody::AudioReady(self.payload_as()?),
        };
        Ok(body)
    }

    fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.payload).map_err(ProtocolError::Decode)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The JSON shapes here are what other clients parse, so the tests pin
    //! field names and tags rather than just round-tripping.

    use super::*;

    #[test]
    fn test_participant_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ParticipantId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_participant_id_display_and_fallback_name() {
        assert_eq!(ParticipantId(7).to_string(), "P-7");
        assert_eq!(ParticipantId(7).fallback_name(), "User7");
    }

    #[test]
    fn test_message_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&MessageKind::JoinAccepted).unwrap();
        assert_eq!(json, "\"join_accepted\"");
        assert_eq!(MessageKind::AudioReady.to_string(), "audio_ready");
    }

    #[test]
    fn test_control_message_join_json_format() {
        let body = ControlBody::Join(JoinRequest {
            username: Some("Alice".into()),
            password: Some("xyz".into()),
            session_name: Some("Jam".into()),
        });
        let msg = ControlMessage::with_timestamp(&body, 1000).unwrap();
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["kind"], "join");
        assert_eq!(json["timestamp"], 1000);

        // The payload is itself a JSON document inside a string.
        let payload: serde_json::Value =
            serde_json::from_str(json["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload["username"], "Alice");
        assert_eq!(payload["password"], "xyz");
        assert_eq!(payload["sessionName"], "Jam");
    }

    #[test]
    fn test_control_message_join_accepted_payload_fields() {
        let body = ControlBody::JoinAccepted(JoinAccepted {
            assigned_id: ParticipantId(3),
            data_port: 8081,
            participant_count: 2,
        });
        let msg = ControlMessage::from_body(&body).unwrap();
        let payload: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();

        assert_eq!(payload["assignedId"], 3);
        assert_eq!(payload["dataPort"], 8081);
        assert_eq!(payload["participantCount"], 2);
    }

    #[test]
    fn test_control_message_leave_has_empty_payload() {
        let msg = ControlMessage::from_body(&ControlBody::Leave).unwrap();
        assert_eq!(msg.kind, MessageKind::Leave);
        assert!(msg.payload.is_empty());
        assert_eq!(msg.body().unwrap(), ControlBody::Leave);
    }

    #[test]
    fn test_control_message_leave_ignores_payload_content() {
        let msg = ControlMessage {
            kind: MessageKind::Leave,
            timestamp: 0,
            payload: "whatever".into(),
        };
        assert_eq!(msg.body().unwrap(), ControlBody::Leave);
    }

    #[test]
    fn test_control_message_missing_payload_defaults_to_empty() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"kind":"leave","timestamp":5}"#).unwrap();
        assert_eq!(msg.payload, "");
    }

    #[test]
    fn test_control_message_body_round_trips_every_kind() {
        let bodies = vec![
            ControlBody::Join(JoinRequest::default()),
            ControlBody::JoinRejected(JoinRejected {
                reason_text: "Invalid password".into(),
            }),
            ControlBody::ParticipantJoined(ParticipantNotice {
                display_name: "Bob".into(),
            }),
            ControlBody::ParticipantLeft(ParticipantNotice {
                display_name: "Bob".into(),
            }),
            ControlBody::AudioReady(AudioReady::new(50000)),
        ];
        for body in bodies {
            let msg = ControlMessage::from_body(&body).unwrap();
            assert_eq!(msg.kind, body.kind());
            assert_eq!(msg.body().unwrap(), body);
        }
    }

    #[test]
    fn test_join_request_all_fields_optional() {
        let req: JoinRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.username(), None);
        assert_eq!(req.password(), "");
    }

    #[test]
    fn test_join_request_blank_username_is_none() {
        let req = JoinRequest {
            username: Some("   ".into()),
            ..JoinRequest::default()
        };
        assert_eq!(req.username(), None);
    }

    #[test]
    fn test_join_request_username_keeps_surrounding_whitespace() {
        let req = JoinRequest {
            username: Some("  Alice ".into()),
            ..JoinRequest::default()
        };
        assert_eq!(req.username(), Some("  Alice "));
    }

    #[test]
    fn test_audio_ready_format_hints_default_when_missing() {
        let ready: AudioReady = serde_json::from_str(r#"{"dataPort":40000}"#).unwrap();
        assert_eq!(ready, AudioReady::new(40000));
        assert_eq!(ready.sample_rate, 48_000);
        assert_eq!(ready.channels, 2);
        assert_eq!(ready.bits_per_sample, 24);
    }

    #[test]
    fn test_body_with_wrong_payload_shape_returns_decode_error() {
        let msg = ControlMessage {
            kind: MessageKind::AudioReady,
            timestamp: 0,
            payload: r#"{"displayName":"Bob"}"#.into(),
        };
        assert!(matches!(msg.body(), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_unknown_kind_fails_to_decode() {
        let result: Result<ControlMessage, _> =
            serde_json::from_str(r#"{"kind":"fly_to_moon","timestamp":0,"payload":""}"#);
        assert!(result.is_err());
    }
}
