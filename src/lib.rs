//! atlas-link - reconnecting real-time client for the Atlas probing platform
//!
//! The core is [`client::EventClient`], a WebSocket client that keeps one
//! logical session alive across many sockets: it reports `open`, `message`,
//! `error` and `close` events to listeners, retries unexpected disconnects
//! a bounded number of times after a fixed delay and never retries after a
//! deliberate `close()`.
//!
//! Built on top of it:
//! - [`protocol`]: the `{type, data}` wire envelope and typed payloads
//! - [`router`]: dispatch of decoded messages by type
//! - [`session`]: the probe side of the protocol (register, heartbeat, tasks)

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod router;
pub mod session;
pub mod version;

pub use client::{ClientConfig, ClientEvent, ConnectionState, EventClient, EventKind, Inbound, Payload};
pub use error::{Error, Result};
