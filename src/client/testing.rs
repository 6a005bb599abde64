//! In-memory transport for exercising the client without a network

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::transport::{Connector, Frame, Transport};
use crate::error::{Error, Result};

/// Scripted result of one connection attempt
#[derive(Debug, Clone, Copy)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    /// Accept after a delay
    Delay(Duration),
}

/// What the fake server pushes to the client
#[derive(Debug)]
pub(crate) enum ServerAction {
    Frame(String),
    Close(Option<u16>),
    Error(String),
}

/// Server side of one accepted connection
///
/// Dropping it ends the client's stream, which looks like an abnormal close.
pub(crate) struct MockServer {
    pub to_client: mpsc::UnboundedSender<ServerAction>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl MockServer {
    pub fn push(&self, text: &str) {
        let _ = self.to_client.send(ServerAction::Frame(text.to_string()));
    }
}

pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    /// Attempts beyond the end of the script are refused
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: AtomicUsize::new(0),
            servers,
        });
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Refuse);

        match outcome {
            Outcome::Refuse => return Err(Error::connection_failed(url, "connection refused")),
            Outcome::Delay(delay) => tokio::time::sleep(delay).await,
            Outcome::Accept => {}
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = self.servers.send(MockServer {
            to_client,
            from_client,
        });
        Ok(Box::new(MockTransport { incoming, outgoing }))
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<ServerAction>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing.send(text).map_err(|_| Error::ConnectionLost {
            message: "server gone".to_string(),
        })
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.incoming.recv().await? {
            ServerAction::Frame(text) => Some(Ok(Frame::Text(text))),
            ServerAction::Close(code) => Some(Ok(Frame::Close {
                code,
                reason: String::new(),
            })),
            ServerAction::Error(message) => Some(Err(Error::ConnectionLost { message })),
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
