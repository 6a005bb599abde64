//! Reconnecting event client
//!
//! Keeps a duplex WebSocket connection to the Atlas server, fans inbound
//! frames out to listeners and recovers from unexpected disconnects with a
//! bounded fixed-delay retry.

#[allow(clippy::module_inception)]
mod client;
mod event;
mod listeners;
pub mod shared;
mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    default_url, validate_url, ClientConfig, EventClient, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY, DEFAULT_WS_PATH,
};
pub use event::{ClientEvent, CloseInfo, EventKind, Inbound, Payload};
pub use listeners::{listener, Listener, ListenerRegistry};
pub use state::{ConnectionState, ReadyState};
pub use transport::{Connector, Frame, Transport, WsConnector};
