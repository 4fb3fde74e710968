//! Event protocol definitions
//!
//! Inbound envelope: `{"type": <string>, "data": <raw JSON>}`. The `data`
//! part is kept as raw JSON and parsed lazily by whichever handler the
//! type selects.
//!
//! Outbound envelope: `{"type": <string>, "payload": <any>}`.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Value};

use crate::error::ApplyError;

/// Client → Server event envelope
#[derive(Debug, Deserialize)]
pub struct IncomingEvent {
    /// Event type discriminator, resolved against [`IncomingEventKind`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Handler-specific data, left unparsed
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl IncomingEvent {
    /// Decode one inbound frame
    pub fn from_slice(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    /// Parse the `data` field into a handler's payload type
    ///
    /// A missing `data` field is treated as JSON `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ApplyError> {
        let raw = self.data.as_deref().map(RawValue::get).unwrap_or("null");
        serde_json::from_str(raw).map_err(|_| ApplyError::InvalidPayload)
    }
}

/// Known inbound event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncomingEventKind {
    SendMessage,
    JoinRoom,
    LeaveRoom,
    EditMessage,
    DeleteMessage,
}

impl IncomingEventKind {
    pub const ALL: [IncomingEventKind; 5] = [
        IncomingEventKind::SendMessage,
        IncomingEventKind::JoinRoom,
        IncomingEventKind::LeaveRoom,
        IncomingEventKind::EditMessage,
        IncomingEventKind::DeleteMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncomingEventKind::SendMessage => "send_message",
            IncomingEventKind::JoinRoom => "join_room",
            IncomingEventKind::LeaveRoom => "leave_room",
            IncomingEventKind::EditMessage => "edit_message",
            IncomingEventKind::DeleteMessage => "delete_message",
        }
    }
}

impl FromStr for IncomingEventKind {
    type Err = ApplyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ApplyError::UnsupportedEvent(s.to_string()))
    }
}

/// Outbound event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    UserJoinedRoom,
    UserLeftRoom,
    Error,
}

/// Server → Client event
///
/// Immutable once built. Fan-out shares one instance between all
/// recipients behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventKind,
    payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Build the unicast `error` event for a rejected inbound event
    pub fn error(err: &ApplyError) -> Self {
        Self::new(
            EventKind::Error,
            json!({
                "code": err.code(),
                "message": err.client_message(),
            }),
        )
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Encode as one outbound text frame
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&ApplyError> for Event {
    fn from(err: &ApplyError) -> Self {
        Event::error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_event_keeps_data_raw() {
        let frame = br#"{"type": "send_message", "data": {"content": "hi"}}"#;
        let incoming = IncomingEvent::from_slice(frame).unwrap();
        assert_eq!(incoming.kind, "send_message");
        assert_eq!(incoming.data.as_ref().unwrap().get(), r#"{"content": "hi"}"#);

        #[derive(Deserialize)]
        struct Content {
            content: String,
        }
        let content: Content = incoming.decode().unwrap();
        assert_eq!(content.content, "hi");
    }

    #[test]
    fn test_decode_mismatch_is_invalid_payload() {
        let incoming = IncomingEvent::from_slice(br#"{"type": "edit_message"}"#).unwrap();

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Edit {
            content: String,
        }
        assert_eq!(
            incoming.decode::<Edit>().unwrap_err(),
            ApplyError::InvalidPayload
        );
    }

    #[test]
    fn test_incoming_kind_lookup() {
        assert_eq!(
            "delete_message".parse::<IncomingEventKind>().unwrap(),
            IncomingEventKind::DeleteMessage
        );
        assert_eq!(
            "dance".parse::<IncomingEventKind>().unwrap_err(),
            ApplyError::UnsupportedEvent("dance".into())
        );
    }

    #[test]
    fn test_event_serialize() {
        let event = Event::new(EventKind::MessageCreated, json!({"id": 1}));
        let json = event.to_frame().unwrap();
        assert_eq!(json, r#"{"type":"message_created","payload":{"id":1}}"#);
    }

    #[test]
    fn test_error_event_payload() {
        let event = Event::error(&ApplyError::Forbidden);
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(event.payload()["code"], "forbidden");
        assert_eq!(event.payload()["message"], "forbidden");
    }
}
