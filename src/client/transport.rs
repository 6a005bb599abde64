//! Transport seam between the client state machine and the network
//!
//! The client only needs a text-frame duplex with an explicit close. The
//! production implementation wraps tokio-tungstenite; tests substitute an
//! in-memory transport.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message as WsFrame,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Inbound transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Peer initiated close
    Close { code: Option<u16>, reason: String },
}

/// One live socket
#[async_trait]
pub trait Transport: Send {
    /// Write a text frame
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound frame; `None` once the stream has ended
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Close the socket
    async fn close(&mut self) -> Result<()>;
}

/// Factory for sockets, used once per connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Implementation
// ─────────────────────────────────────────────────────────────────

/// Connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        debug!(url = %url, "Opening WebSocket");

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                Error::connection_failed(
                    url,
                    format!("handshake timed out after {}ms", self.connect_timeout.as_millis()),
                )
            })?
            .map_err(|e| Error::connection_failed(url, e.to_string()))?;

        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// Live tokio-tungstenite socket
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(WsFrame::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };

            match frame {
                WsFrame::Text(text) => return Some(Ok(Frame::Text(text))),
                WsFrame::Binary(data) => return Some(Ok(Frame::Text(binary_to_text(data)))),
                WsFrame::Close(close) => {
                    let (code, reason) = close
                        .map(|c| (Some(u16::from(c.code)), c.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // tungstenite answers pings itself
                other => trace!(frame = ?other, "Skipping control frame"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Binary frames are delivered as text; invalid UTF-8 is replaced
fn binary_to_text(data: Vec<u8>) -> String {
    match String::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            let len = e.as_bytes().len();
            debug!(
                bytes = len,
                valid_up_to = e.utf8_error().valid_up_to(),
                "Binary frame is not valid UTF-8, replacing invalid sequences"
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}
