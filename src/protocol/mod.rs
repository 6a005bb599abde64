//! Protocol module for the Atlas real-time channel
//!
//! Defines the wire envelope, message kinds and typed payloads exchanged
//! between probes, the server and dashboards. The protocol is JSON over
//! WebSocket with a `type` discriminator and a free-form `data` payload.

mod messages;
mod results;

pub use messages::*;
pub use results::*;
