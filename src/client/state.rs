//! Connection phases

use std::fmt;

/// Phase of the underlying socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

/// Lifecycle state of the client as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and nothing scheduled
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Usable for sending
    Open,
    /// Dropped unexpectedly; a retry timer is pending
    ClosedPendingRetry,
    /// Closed by `close()` or after retries ran out
    ClosedFinal,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ClosedPendingRetry => "closed (retry pending)",
            ConnectionState::ClosedFinal => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
