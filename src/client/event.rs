//! Events emitted by the client and payloads accepted by `send`

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::WsMessage;

/// The four local event kinds listeners can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Open,
        EventKind::Message,
        EventKind::Error,
        EventKind::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Message => "message",
            EventKind::Error => "error",
            EventKind::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(EventKind::Open),
            "message" => Ok(EventKind::Message),
            "error" => Ok(EventKind::Error),
            "close" => Ok(EventKind::Close),
            other => Err(Error::ProtocolUnexpected {
                kind: "event".to_string(),
                message: format!("unknown event kind '{}'", other),
            }),
        }
    }
}

/// Inbound frame contents
///
/// Frames are decoded as JSON when possible. Anything else is delivered
/// unchanged as raw text, so `message` listeners must accept both shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Structured(Value),
    Raw(String),
}

impl Inbound {
    /// Decode a text frame, falling back to the raw text
    pub fn decode(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Inbound::Structured(value),
            Err(_) => Inbound::Raw(text),
        }
    }

    /// View a structured frame as a protocol envelope
    pub fn as_message(&self) -> Option<WsMessage> {
        match self {
            Inbound::Structured(value) => WsMessage::from_value(value),
            Inbound::Raw(_) => None,
        }
    }
}

/// Details of a socket closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, when the peer sent one
    pub code: Option<u16>,
    pub reason: String,
    /// True when the close followed a call to `close()`
    pub manual: bool,
}

impl CloseInfo {
    /// Whether this closure was not requested by the application
    pub fn is_abnormal(&self) -> bool {
        !self.manual
    }
}

/// Event delivered to listeners
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Open,
    Message(Inbound),
    Error(Arc<Error>),
    Close(CloseInfo),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Open => EventKind::Open,
            ClientEvent::Message(_) => EventKind::Message,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::Close(_) => EventKind::Close,
        }
    }

    pub(crate) fn error(err: Error) -> Self {
        ClientEvent::Error(Arc::new(err))
    }
}

/// Outbound payload
///
/// Text is written verbatim; JSON values are serialized first.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
}

impl Payload {
    /// Encode a serializable value as a JSON payload
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Payload::Json(serde_json::to_value(value)?))
    }

    pub(crate) fn into_text(self) -> Result<String> {
        match self {
            Payload::Text(text) => Ok(text),
            Payload::Json(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}
