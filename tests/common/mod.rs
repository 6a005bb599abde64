//! Common test utilities and fixtures
//!
//! Config fixtures plus a small in-process WebSocket server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn valid_config_fixture() -> PathBuf {
    fixtures_dir().join("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixtures_dir().join("invalid_config.toml")
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    /// Drop every connection without a close handshake
    Kick,
}

/// WebSocket server on an ephemeral local port
pub struct TestServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    commands: broadcast::Sender<Command>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server that sends `greeting` to every new connection
    pub async fn start(greeting: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);

        let accept_task = {
            let received = received.clone();
            let connections = connections.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let received = received.clone();
                    let connections = connections.clone();
                    let commands = commands.subscribe();
                    let greeting = greeting.clone();
                    tokio::spawn(async move {
                        if let Ok(ws) = accept_async(stream).await {
                            connections.fetch_add(1, Ordering::SeqCst);
                            handle_connection(ws, received, commands, greeting).await;
                        }
                    });
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            commands,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Send a text frame to every connected client
    pub fn push(&self, text: &str) {
        let _ = self.commands.send(Command::Push(text.to_string()));
    }

    /// Abruptly drop every connected client
    pub fn kick(&self) {
        let _ = self.commands.send(Command::Kick);
    }

    /// Text frames received from clients, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Completed WebSocket handshakes so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.commands.send(Command::Kick);
    }
}

async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    received: Arc<Mutex<Vec<String>>>,
    mut commands: broadcast::Receiver<Command>,
    greeting: Vec<String>,
) {
    let (mut write, mut read) = ws.split();

    for frame in greeting {
        if write.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => received.lock().push(text),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Ok(Command::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Kick) | Err(_) => break,
            },
        }
    }
}
