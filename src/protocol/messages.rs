//! Protocol message definitions
//!
//! Every frame is a [`WsMessage`] envelope. The `type` field selects the
//! payload shape carried in `data`; unknown types are preserved verbatim so
//! that newer servers do not break older clients.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Message Kinds
// ─────────────────────────────────────────────────────────────────

/// Value of the envelope's `type` field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    // ─── Probe → Server ─────────────────────────────────────────
    Register,
    Heartbeat,
    TaskResult,
    TaskStatus,
    Error,

    // ─── Server → Probe ─────────────────────────────────────────
    RegisterAck,
    HeartbeatAck,
    TaskAssign,
    TaskCancel,
    Config,

    // ─── Bidirectional ──────────────────────────────────────────
    Ping,
    Pong,

    // ─── Server → Dashboard feed ────────────────────────────────
    ProbeRegister,
    TaskDispatch,
    ResultReport,
    ProbeHeartbeat,

    /// Any type this client does not know about
    Other(String),
}

impl MessageKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Register => "register",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::TaskResult => "task_result",
            MessageKind::TaskStatus => "task_status",
            MessageKind::Error => "error",
            MessageKind::RegisterAck => "register_ack",
            MessageKind::HeartbeatAck => "heartbeat_ack",
            MessageKind::TaskAssign => "task_assign",
            MessageKind::TaskCancel => "task_cancel",
            MessageKind::Config => "config",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::ProbeRegister => "probe_register",
            MessageKind::TaskDispatch => "task_dispatch",
            MessageKind::ResultReport => "result_report",
            MessageKind::ProbeHeartbeat => "probe_heartbeat",
            MessageKind::Other(name) => name,
        }
    }

    /// Whether a probe sends this kind to the server
    pub fn is_probe_originated(&self) -> bool {
        matches!(
            self,
            MessageKind::Register
                | MessageKind::Heartbeat
                | MessageKind::TaskResult
                | MessageKind::TaskStatus
                | MessageKind::Error
        )
    }
}

impl From<&str> for MessageKind {
    fn from(name: &str) -> Self {
        match name {
            "register" => MessageKind::Register,
            "heartbeat" => MessageKind::Heartbeat,
            "task_result" => MessageKind::TaskResult,
            "task_status" => MessageKind::TaskStatus,
            "error" => MessageKind::Error,
            "register_ack" => MessageKind::RegisterAck,
            "heartbeat_ack" => MessageKind::HeartbeatAck,
            "task_assign" => MessageKind::TaskAssign,
            "task_cancel" => MessageKind::TaskCancel,
            "config" => MessageKind::Config,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "probe_register" => MessageKind::ProbeRegister,
            "task_dispatch" => MessageKind::TaskDispatch,
            "result_report" => MessageKind::ResultReport,
            "probe_heartbeat" => MessageKind::ProbeHeartbeat,
            other => MessageKind::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(name: String) -> Self {
        MessageKind::from(name.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────

/// Envelope timestamp
///
/// The server stamps frames with Unix seconds while dashboard feeds carry
/// RFC 3339 strings, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Text(String),
}

impl Timestamp {
    /// Current time as Unix seconds
    pub fn now() -> Self {
        Timestamp::Unix(Utc::now().timestamp())
    }
}

/// Wire envelope shared by both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Request id used to correlate responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Send time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,

    /// Kind-specific payload
    #[serde(default)]
    pub data: Value,
}

impl WsMessage {
    /// Build a stamped envelope around an already-encoded payload
    pub fn new(kind: impl Into<MessageKind>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            request_id: Some(Uuid::new_v4().to_string()),
            timestamp: Some(Timestamp::now()),
            data,
        }
    }

    /// Build a stamped envelope, serializing a typed payload into `data`
    pub fn with_payload<T: Serialize>(kind: impl Into<MessageKind>, payload: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Interpret a decoded JSON value as an envelope
    ///
    /// Returns `None` when the value is not an object with a string `type`.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("type")?.as_str()?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Parse an envelope from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::ProtocolMalformed {
            message: e.to_string(),
        })
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode `data` into a typed payload
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| Error::ProtocolMalformed {
            message: format!("invalid {} payload: {}", self.kind, e),
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────

/// Probe registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub probe_id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub region: String,
    /// Test types this probe can execute
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: String,
    #[serde(default)]
    pub auth_token: String,
    /// Extra facts such as os, arch, latitude, longitude, asn
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Server-side settings pushed to a probe on registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeServerConfig {
    /// Heartbeat interval in seconds
    #[serde(default)]
    pub heartbeat_interval: u64,
    #[serde(default)]
    pub max_concurrent_tasks: u32,
}

/// Registration acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub success: bool,
    #[serde(default)]
    pub probe_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub config: ProbeServerConfig,
}

// ─────────────────────────────────────────────────────────────────
// Heartbeat
// ─────────────────────────────────────────────────────────────────

/// Probe liveness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub probe_id: String,
    /// online or busy
    pub status: String,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub mem_usage: f64,
    #[serde(default)]
    pub active_tasks: u32,
}

/// Heartbeat acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    #[serde(default)]
    pub timestamp: i64,
    /// Seconds until the next heartbeat is expected
    #[serde(default)]
    pub next_heartbeat: u64,
}

// ─────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────

/// Task assignment from the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssign {
    pub task_id: String,
    pub execution_id: String,
    pub task_type: String,
    pub target: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    /// Timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout: u64,
}

/// Cancellation of a running or queued execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCancel {
    pub execution_id: String,
    pub task_id: String,
    #[serde(default)]
    pub reason: String,
}

/// Final outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failed,
}

/// Execution result upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub execution_id: String,
    pub task_id: String,
    /// Filled in by the session when empty
    #[serde(default)]
    pub probe_id: String,
    pub status: ExecutionOutcome,
    #[serde(default)]
    pub result_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution time in milliseconds
    #[serde(default)]
    pub duration: u64,
}

/// Progress report for a running execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub execution_id: String,
    pub task_id: String,
    #[serde(default)]
    pub probe_id: String,
    pub status: String,
    /// Percentage, 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error report in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Dashboard Feed
// ─────────────────────────────────────────────────────────────────

/// A probe came online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRegisterEvent {
    pub probe_id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub version: String,
}

/// Task handed to a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDispatchEvent {
    pub execution_id: String,
    pub task: DispatchedTask,
}

/// Task summary inside a dispatch event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedTask {
    pub task_id: String,
    pub task_type: String,
    pub target: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Result arrived from a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReportEvent {
    pub execution_id: String,
    pub probe_id: String,
    #[serde(default)]
    pub result: Value,
}

/// Probe heartbeat seen by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeHeartbeatEvent {
    pub probe_id: String,
}

/// Task-level status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub task_id: String,
    pub status: String,
}
