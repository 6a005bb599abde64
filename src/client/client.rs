//! Reconnecting event client
//!
//! One [`EventClient`] lives for the whole session while its socket is
//! created and torn down many times underneath it:
//! - `connect()` returns immediately; the outcome arrives as events
//! - unexpected closes are retried after a fixed delay, a bounded number of times
//! - `close()` is final until the next explicit `connect()`

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::event::{ClientEvent, CloseInfo, EventKind, Inbound, Payload};
use super::listeners::{self, Listener, ListenerRegistry};
use super::state::{ConnectionState, ReadyState};
use super::transport::{Connector, Frame, Transport, WsConnector};
use crate::error::{Error, Result};
use crate::protocol::WsMessage;

/// Path the Atlas server mounts its WebSocket endpoint on
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default number of automatic reconnect attempts
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for the event client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target WebSocket URL
    pub url: String,

    /// Automatic reconnect attempts after an unexpected close
    pub max_reconnect_attempts: u32,

    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,

    /// Handshake timeout for the default connector
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Config targeting `ws://{host}/ws`
    pub fn for_host(host: &str) -> Self {
        Self::new(default_url(host))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url("localhost:8080"),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Default endpoint for a host (`ws://{host}/ws`)
pub fn default_url(host: &str) -> String {
    format!("ws://{}{}", host, DEFAULT_WS_PATH)
}

/// Check that `url` is an absolute ws:// or wss:// URL
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(Error::invalid_url(url, format!("unsupported scheme '{}'", other))),
    }
}

// ─────────────────────────────────────────────────────────────────
// Shared State
// ─────────────────────────────────────────────────────────────────

enum Outbound {
    Frame(String),
    Close,
}

struct RetryTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    url: String,
    ready: ReadyState,
    attempts: u32,
    manual_close: bool,
    exhausted: bool,
    /// Bumped whenever a socket is superseded; stale drivers compare against it
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    driver: Option<JoinHandle<()>>,
    retry: Option<RetryTimer>,
    next_timer_id: u64,
}

impl Shared {
    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.handle.abort();
        }
    }

    fn connection_state(&self) -> ConnectionState {
        match self.ready {
            ReadyState::Connecting => ConnectionState::Connecting,
            ReadyState::Open => ConnectionState::Open,
            ReadyState::Closing => ConnectionState::ClosedFinal,
            ReadyState::Closed if self.retry.is_some() => ConnectionState::ClosedPendingRetry,
            ReadyState::Closed if self.manual_close || self.exhausted => ConnectionState::ClosedFinal,
            ReadyState::Closed => ConnectionState::Idle,
        }
    }
}

struct Inner {
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    listeners: Mutex<ListenerRegistry>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        listeners::dispatch(&self.listeners, &event);
    }
}

// ─────────────────────────────────────────────────────────────────
// Event Client
// ─────────────────────────────────────────────────────────────────

/// Reconnecting real-time client
///
/// Cloning is cheap and every clone drives the same connection. All
/// methods must be called from within a tokio runtime; outside one,
/// `connect()` reports an `error` event instead of connecting.
#[derive(Clone)]
pub struct EventClient {
    inner: Arc<Inner>,
}

impl EventClient {
    /// Create a client using the WebSocket connector
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Create a client with a custom transport connector
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_reconnect_attempts: config.max_reconnect_attempts,
                reconnect_delay: config.reconnect_delay,
                connector,
                shared: Mutex::new(Shared {
                    url: config.url,
                    ready: ReadyState::Closed,
                    attempts: 0,
                    manual_close: false,
                    exhausted: false,
                    generation: 0,
                    outbound: None,
                    driver: None,
                    retry: None,
                    next_timer_id: 0,
                }),
                listeners: Mutex::new(ListenerRegistry::new()),
            }),
        }
    }

    /// Start connecting to the configured URL
    ///
    /// No-op while the connection is open.
    pub fn connect(&self) {
        start_connect(&self.inner, None);
    }

    /// Start connecting to `url`, which replaces the configured target
    pub fn connect_to(&self, url: impl Into<String>) {
        start_connect(&self.inner, Some(url.into()));
    }

    /// Send a payload over the open connection
    ///
    /// Fails with [`Error::NotConnected`] unless the connection is open.
    /// Nothing is queued for later delivery.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<()> {
        let tx = {
            let shared = self.inner.shared.lock();
            if shared.ready != ReadyState::Open {
                return Err(Error::NotConnected);
            }
            shared.outbound.clone().ok_or(Error::NotConnected)?
        };

        let text = payload.into().into_text()?;
        tx.send(Outbound::Frame(text)).map_err(|_| Error::NotConnected)
    }

    /// Send raw text
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Payload::Text(text.into()))
    }

    /// Serialize a value as JSON and send it
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.send(Payload::json(value)?)
    }

    /// Send a protocol envelope
    pub fn send_message(&self, message: &WsMessage) -> Result<()> {
        self.send_json(message)
    }

    /// Close the connection and stop reconnecting
    ///
    /// Safe to call repeatedly.
    pub fn close(&self) {
        let mut shared = self.inner.shared.lock();
        shared.manual_close = true;
        shared.cancel_retry();

        if let Some(tx) = shared.outbound.take() {
            // The driver performs the close handshake and emits `close`
            shared.ready = ReadyState::Closing;
            shared.driver = None;
            let _ = tx.send(Outbound::Close);
            info!(url = %shared.url, "Closing connection");
        } else if shared.ready != ReadyState::Closing {
            if let Some(driver) = shared.driver.take() {
                driver.abort();
                debug!(url = %shared.url, "Cancelled in-flight connection attempt");
            }
            shared.generation += 1;
            shared.ready = ReadyState::Closed;
        }
    }

    /// Register a listener for an event kind
    ///
    /// Registering the same handle twice for one kind has no effect.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        self.inner.listeners.lock().add(kind, listener);
    }

    /// Register a closure and return its handle for later [`off`](Self::off)
    pub fn on_fn<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let listener = listeners::listener(f);
        self.on(kind, listener.clone());
        listener
    }

    /// Unregister a listener
    pub fn off(&self, kind: EventKind, listener: &Listener) {
        self.inner.listeners.lock().remove(kind, listener);
    }

    /// Number of listeners registered for a kind
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.listeners.lock().len(kind)
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().connection_state()
    }

    /// Raw socket phase
    pub fn ready_state(&self) -> ReadyState {
        self.inner.shared.lock().ready
    }

    /// Whether `send` would currently be accepted
    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().attempts
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner.shared.lock().retry.is_some()
    }

    /// Current target URL
    pub fn url(&self) -> String {
        self.inner.shared.lock().url.clone()
    }
}

impl std::fmt::Debug for EventClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("EventClient")
            .field("url", &shared.url)
            .field("state", &shared.connection_state())
            .field("attempts", &shared.attempts)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Driver
// ─────────────────────────────────────────────────────────────────

fn start_connect(inner: &Arc<Inner>, url: Option<String>) {
    let runtime = match Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            let url = url.unwrap_or_else(|| inner.shared.lock().url.clone());
            warn!(url = %url, "connect() called outside a tokio runtime");
            inner.emit(ClientEvent::error(Error::TransportConstruction {
                url,
                message: e.to_string(),
            }));
            return;
        }
    };

    let failure = {
        let mut shared = inner.shared.lock();
        if let Some(url) = url {
            shared.url = url;
        }

        if shared.ready == ReadyState::Open {
            debug!(url = %shared.url, "Already connected");
            return;
        }

        shared.manual_close = false;
        shared.exhausted = false;
        shared.cancel_retry();
        begin_connect(inner, &runtime, &mut shared)
    };

    if let Some(e) = failure {
        inner.emit(ClientEvent::error(e));
    }
}

/// Supersede any in-flight attempt and spawn a driver for a new socket
///
/// Runs under the state lock. A construction failure is returned so the
/// caller can emit it after unlocking.
fn begin_connect(inner: &Arc<Inner>, runtime: &Handle, shared: &mut Shared) -> Option<Error> {
    if shared.ready == ReadyState::Connecting {
        if let Some(driver) = shared.driver.take() {
            driver.abort();
        }
    }
    shared.generation += 1;

    let url = shared.url.clone();
    if let Err(e) = validate_url(&url) {
        shared.ready = ReadyState::Closed;
        warn!(error = %e, "Cannot create socket");
        return Some(Error::TransportConstruction {
            url,
            message: e.to_string(),
        });
    }

    shared.ready = ReadyState::Connecting;
    let generation = shared.generation;
    info!(url = %url, attempt = shared.attempts, "Connecting");
    shared.driver = Some(runtime.spawn(run_socket(inner.clone(), generation, url)));
    None
}

/// Own one socket from handshake to close
async fn run_socket(inner: Arc<Inner>, generation: u64, url: String) {
    let mut transport = match inner.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(url = %url, error = %e, "Connection attempt failed");
            let reason = e.to_string();
            inner.emit(ClientEvent::error(e));
            handle_closed(&inner, generation, None, reason);
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let superseded = {
        let mut shared = inner.shared.lock();
        if shared.generation != generation || shared.manual_close {
            true
        } else {
            shared.ready = ReadyState::Open;
            shared.attempts = 0;
            shared.outbound = Some(tx);
            false
        }
    };

    if superseded {
        debug!(url = %url, "Socket opened after being superseded, discarding");
        let _ = transport.close().await;
        return;
    }

    info!(url = %url, "Connection open");
    inner.emit(ClientEvent::Open);

    let (code, reason) = pump(&inner, transport.as_mut(), &mut rx).await;
    handle_closed(&inner, generation, code, reason);
}

/// Move frames in both directions until the socket closes
async fn pump(
    inner: &Inner,
    transport: &mut dyn Transport,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> (Option<u16>, String) {
    loop {
        tokio::select! {
            frame = transport.recv() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    inner.emit(ClientEvent::Message(Inbound::decode(text)));
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    debug!(code = ?code, reason = %reason, "Peer closed connection");
                    return (code, reason);
                }
                Some(Err(e)) => {
                    let reason = e.to_string();
                    warn!(error = %reason, "Transport error");
                    inner.emit(ClientEvent::error(e));
                    return (Some(1006), reason);
                }
                None => return (Some(1006), "stream ended".to_string()),
            },

            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = transport.send(text).await {
                        let reason = e.to_string();
                        warn!(error = %reason, "Failed to write frame");
                        inner.emit(ClientEvent::error(e));
                        return (Some(1006), reason);
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    return (Some(1000), "closed by client".to_string());
                }
            },
        }
    }
}

/// Apply the retry policy after a socket is gone and emit `close`
fn handle_closed(inner: &Arc<Inner>, generation: u64, code: Option<u16>, reason: String) {
    let info = {
        let mut shared = inner.shared.lock();
        if shared.generation != generation {
            return;
        }

        shared.ready = ReadyState::Closed;
        shared.outbound = None;
        shared.driver = None;

        let info = CloseInfo {
            code,
            reason,
            manual: shared.manual_close,
        };

        if shared.manual_close {
            info!(url = %shared.url, "Connection closed");
        } else if shared.attempts < inner.max_reconnect_attempts {
            shared.attempts += 1;
            schedule_retry(inner, &mut shared);
        } else {
            shared.exhausted = true;
            warn!(
                url = %shared.url,
                attempts = shared.attempts,
                "Reconnect attempts exhausted, staying idle"
            );
        }

        info
    };

    inner.emit(ClientEvent::Close(info));
}

fn schedule_retry(inner: &Arc<Inner>, shared: &mut Shared) {
    shared.cancel_retry();

    let id = shared.next_timer_id;
    shared.next_timer_id += 1;
    let delay = inner.reconnect_delay;

    info!(
        url = %shared.url,
        attempt = shared.attempts,
        max = inner.max_reconnect_attempts,
        delay_ms = delay.as_millis() as u64,
        "Connection lost, scheduling reconnect"
    );

    let timer_inner = inner.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        // close() must observe either this timer or the attempt it starts
        let failure = {
            let mut shared = timer_inner.shared.lock();
            // A newer timer or a cancel got here first
            if shared.retry.as_ref().map(|timer| timer.id) != Some(id) || shared.manual_close {
                return;
            }
            shared.retry = None;
            begin_connect(&timer_inner, &Handle::current(), &mut shared)
        };

        if let Some(e) = failure {
            timer_inner.emit(ClientEvent::error(e));
        }
    });

    shared.retry = Some(RetryTimer { id, handle });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{MockConnector, MockServer, Outcome, ServerAction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn mock_client(script: Vec<Outcome>) -> (EventClient, Arc<MockConnector>, mpsc::UnboundedReceiver<MockServer>) {
        let (connector, servers) = MockConnector::new(script);
        let client = EventClient::with_connector(ClientConfig::new("ws://host/ws"), connector.clone());
        (client, connector, servers)
    }

    fn record(client: &EventClient) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            client.on_fn(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    async fn next_close(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> CloseInfo {
        loop {
            match events.recv().await {
                Some(ClientEvent::Close(info)) => return info,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://localhost:8080/ws");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(ClientConfig::for_host("atlas.example:9000").url, "ws://atlas.example:9000/ws");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://host/ws").is_ok());
        assert!(validate_url("wss://host/ws").is_ok());
        assert!(validate_url("http://host/ws").is_err());
        assert!(validate_url("host/ws").is_err());
    }

    #[test]
    fn test_connect_outside_runtime_reports_error() {
        let client = EventClient::new(ClientConfig::default());
        let mut events = record(&client);

        client.connect();

        match events.try_recv() {
            Ok(ClientEvent::Error(e)) => {
                assert!(matches!(*e, Error::TransportConstruction { .. }))
            }
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_url_reports_error() {
        let (client, connector, _servers) = mock_client(vec![]);
        let mut events = record(&client);

        client.connect_to("http://host/ws");

        assert!(matches!(events.recv().await, Some(ClientEvent::Error(_))));
        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(connector.attempts(), 0);
        assert_eq!(client.url(), "http://host/ws");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_scenario() {
        let (client, _connector, mut servers) =
            mock_client(vec![Outcome::Accept, Outcome::Accept, Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        assert_eq!(client.state(), ConnectionState::Connecting);
        let server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(client.state(), ConnectionState::Open);

        // Abnormal close schedules exactly one retry
        let dropped_at = Instant::now();
        server
            .to_client
            .send(ServerAction::Close(Some(1006)))
            .unwrap();
        let info = next_close(&mut events).await;
        assert!(info.is_abnormal());
        assert_eq!(info.code, Some(1006));
        assert_eq!(client.state(), ConnectionState::ClosedPendingRetry);
        assert_eq!(client.reconnect_attempts(), 1);

        let server = servers.recv().await.unwrap();
        assert!(dropped_at.elapsed() >= DEFAULT_RECONNECT_DELAY);
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        assert_eq!(client.reconnect_attempts(), 0);

        // Second drop, then a successful reopen resets the counter
        drop(server);
        let info = next_close(&mut events).await;
        assert_eq!(info.code, Some(1006));
        assert_eq!(client.reconnect_attempts(), 1);

        let _server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        assert_eq!(client.reconnect_attempts(), 0);
        assert!(!client.has_pending_retry());

        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_after_max_attempts() {
        let (client, connector, _servers) = mock_client(vec![]);
        let mut events = record(&client);

        client.connect();
        for _ in 0..=DEFAULT_MAX_RECONNECT_ATTEMPTS {
            let info = next_close(&mut events).await;
            assert!(info.is_abnormal());
        }

        assert_eq!(connector.attempts(), 1 + DEFAULT_MAX_RECONNECT_ATTEMPTS as usize);
        assert!(!client.has_pending_retry());
        assert_eq!(client.state(), ConnectionState::ClosedFinal);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1 + DEFAULT_MAX_RECONNECT_ATTEMPTS as usize);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_handshake_reports_error_then_close() {
        let (client, _connector, _servers) = mock_client(vec![Outcome::Refuse]);
        let mut events = record(&client);

        client.connect();

        match events.recv().await {
            Some(ClientEvent::Error(e)) => assert!(matches!(*e, Error::ConnectionFailed { .. })),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(ClientEvent::Close(_))));
        assert_eq!(client.state(), ConnectionState::ClosedPendingRetry);
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_retry() {
        let (client, connector, mut servers) = mock_client(vec![Outcome::Accept, Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        let server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        drop(server);
        next_close(&mut events).await;
        assert!(client.has_pending_retry());

        client.close();
        assert!(!client.has_pending_retry());
        assert_eq!(client.state(), ConnectionState::ClosedFinal);

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY * 10).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::ClosedFinal);

        // An explicit connect starts over
        client.connect();
        let _server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        assert_eq!(connector.attempts(), 2);
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_close_is_final() {
        let (client, connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        let _server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        client.close();
        client.close();
        let info = next_close(&mut events).await;
        assert!(info.manual);
        assert_eq!(client.state(), ConnectionState::ClosedFinal);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting_suppresses_open() {
        let (client, connector, _servers) =
            mock_client(vec![Outcome::Delay(Duration::from_secs(1))]);
        let mut events = record(&client);

        client.connect();
        while connector.attempts() == 0 {
            tokio::task::yield_now().await;
        }
        client.close();
        assert_eq!(client.state(), ConnectionState::ClosedFinal);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::ClosedFinal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_open_is_noop() {
        let (client, connector, mut servers) = mock_client(vec![Outcome::Accept, Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        let _server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        client.connect();
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 1);
        assert!(client.is_connected());
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_listener_delivers_once() {
        let (client, _connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = listeners::listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        client.on(EventKind::Open, handle.clone());
        client.on(EventKind::Open, handle.clone());
        assert_eq!(client.listener_count(EventKind::Open), 1);
        let mut events = record(&client);

        client.connect();
        let _server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        client.off(EventKind::Open, &handle);
        assert_eq!(client.listener_count(EventKind::Open), 1);
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_open_connection() {
        let (client, _connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let mut events = record(&client);

        assert!(matches!(client.send_text("early"), Err(Error::NotConnected)));

        client.connect();
        assert!(matches!(
            client.send_json(&serde_json::json!({"type": "ping"})),
            Err(Error::NotConnected)
        ));

        let mut server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        client.send_text("hello").unwrap();
        client.send(serde_json::json!({"type": "ping", "data": {}})).unwrap();
        assert_eq!(server.from_client.recv().await.unwrap(), "hello");
        assert_eq!(
            server.from_client.recv().await.unwrap(),
            r#"{"data":{},"type":"ping"}"#
        );

        client.close();
        assert!(matches!(client.send_text("late"), Err(Error::NotConnected)));
        next_close(&mut events).await;
        assert!(server.from_client.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_decode_or_fall_back() {
        let (client, _connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        let server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        server.push(r#"{"type":"probe_heartbeat","data":{"probe_id":"p1"}}"#);
        server.push("not json");

        match events.recv().await {
            Some(ClientEvent::Message(Inbound::Structured(value))) => {
                assert_eq!(value["type"], "probe_heartbeat");
                assert_eq!(value["data"]["probe_id"], "p1");
            }
            other => panic!("expected structured message, got {:?}", other),
        }
        match events.recv().await {
            Some(ClientEvent::Message(Inbound::Raw(text))) => assert_eq!(text, "not json"),
            other => panic!("expected raw message, got {:?}", other),
        }
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_reported() {
        let (client, _connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let mut events = record(&client);

        client.connect();
        let server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        server
            .to_client
            .send(ServerAction::Error("reset by peer".to_string()))
            .unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Error(_))));
        let info = next_close(&mut events).await;
        assert!(info.is_abnormal());
        client.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_from_close_listener_cancels_retry() {
        let (client, connector, mut servers) = mock_client(vec![Outcome::Accept]);
        let closer = client.clone();
        client.on_fn(EventKind::Close, move |_| closer.close());
        let mut events = record(&client);

        client.connect();
        let server = servers.recv().await.unwrap();
        assert!(matches!(events.recv().await, Some(ClientEvent::Open)));

        drop(server);
        next_close(&mut events).await;
        assert!(!client.has_pending_retry());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_retry_timer_stays_closed() {
        for round in 0..200u64 {
            let (connector, _servers) = MockConnector::new(Vec::new());
            let config = ClientConfig {
                reconnect_delay: Duration::from_micros(200),
                max_reconnect_attempts: u32::MAX,
                ..ClientConfig::new("ws://host/ws")
            };
            let client = EventClient::with_connector(config, connector.clone());

            // Every attempt is refused, so a retry timer keeps firing
            client.connect();
            tokio::time::sleep(Duration::from_micros(round * 37 % 2000)).await;
            client.close();
            assert_eq!(client.state(), ConnectionState::ClosedFinal, "round {}", round);

            // Let a driver that was mid-poll on another worker finish
            tokio::time::sleep(Duration::from_millis(2)).await;
            let attempts = connector.attempts();

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(connector.attempts(), attempts, "round {}", round);
            assert_eq!(client.state(), ConnectionState::ClosedFinal, "round {}", round);
            assert!(!client.has_pending_retry());
        }
    }
}
