//! Probe session over the event client
//!
//! Speaks the probe side of the Atlas protocol on top of an [`EventClient`]:
//! registers on every open, heartbeats while open, and surfaces server
//! messages as [`SessionEvent`]s. The client keeps owning reconnection; the
//! session just re-registers whenever a new socket opens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ClientEvent, CloseInfo, EventClient, EventKind, Listener};
use crate::error::{Error, Result};
use crate::protocol::{
    ErrorPayload, HeartbeatAck, HeartbeatPayload, MessageKind, ProbeServerConfig, RegisterAck,
    RegisterPayload, TaskAssign, TaskCancel, TaskResult, TaskStatusUpdate, WsMessage,
};
use crate::router::MessageRouter;

/// File name of the persisted probe id
pub const PROBE_ID_FILE_NAME: &str = "probe_id.txt";

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────
// Probe Identity
// ─────────────────────────────────────────────────────────────────

/// Everything the probe reports about itself when registering
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeIdentity {
    pub probe_id: String,
    pub name: String,
    pub location: String,
    pub region: String,
    pub capabilities: Vec<String>,
    pub version: String,
    pub auth_token: String,
    pub metadata: HashMap<String, String>,
}

impl ProbeIdentity {
    /// Identity with host facts (`os`, `arch`) already in the metadata
    pub fn new(probe_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("os".to_string(), std::env::consts::OS.to_string());
        metadata.insert("arch".to_string(), std::env::consts::ARCH.to_string());

        Self {
            probe_id: probe_id.into(),
            name: name.into(),
            location: String::new(),
            region: String::new(),
            capabilities: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth_token: String::new(),
            metadata,
        }
    }

    /// Record coordinates in the metadata
    pub fn with_coordinates(mut self, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        if let Some(lat) = latitude {
            self.metadata.insert("latitude".to_string(), format!("{:.6}", lat));
        }
        if let Some(lon) = longitude {
            self.metadata.insert("longitude".to_string(), format!("{:.6}", lon));
        }
        self
    }

    pub fn register_payload(&self) -> RegisterPayload {
        RegisterPayload {
            probe_id: self.probe_id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            region: self.region.clone(),
            capabilities: self.capabilities.clone(),
            version: self.version.clone(),
            auth_token: self.auth_token.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Stable Probe Id
// ─────────────────────────────────────────────────────────────────

/// Where the probe id is persisted
///
/// `ATLAS_PROBE_ID_FILE`, then `ATLAS_PROBE_ID_DIR/probe_id.txt`, then the
/// user config dir, then the working directory.
pub fn default_probe_id_path() -> PathBuf {
    if let Some(file) = non_empty_env("ATLAS_PROBE_ID_FILE") {
        return PathBuf::from(file);
    }
    if let Some(dir) = non_empty_env("ATLAS_PROBE_ID_DIR") {
        return PathBuf::from(dir).join(PROBE_ID_FILE_NAME);
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("atlas").join(PROBE_ID_FILE_NAME);
    }
    PathBuf::from(PROBE_ID_FILE_NAME)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Generate a fresh probe id
pub fn generate_probe_id() -> String {
    format!("probe-{}", Uuid::new_v4())
}

/// Load the probe id stored at `path`, creating and persisting one if needed
pub fn load_or_create_probe_id(path: &Path) -> Result<String> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        let probe_id = contents.trim();
        if !probe_id.is_empty() {
            debug!(path = %path.display(), probe_id = %probe_id, "Loaded probe id");
            return Ok(probe_id.to_string());
        }
    }

    let probe_id = generate_probe_id();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, &probe_id).map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!(path = %path.display(), probe_id = %probe_id, "Created probe id");
    Ok(probe_id)
}

/// Like [`load_or_create_probe_id`], but falls back to an unsaved id
pub fn resolve_probe_id(path: &Path) -> String {
    load_or_create_probe_id(path).unwrap_or_else(|e| {
        let probe_id = generate_probe_id();
        warn!(error = %e, probe_id = %probe_id, "Could not persist probe id, using a temporary one");
        probe_id
    })
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// Notable things that happened on a probe session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Socket opened and `register` was sent
    Connected,
    Registered(RegisterAck),
    RegistrationRejected(String),
    HeartbeatAck(HeartbeatAck),
    TaskAssigned(TaskAssign),
    TaskCancelled(TaskCancel),
    ConfigUpdated(ProbeServerConfig),
    ServerError(ErrorPayload),
    Disconnected(CloseInfo),
}

struct SessionShared {
    client: EventClient,
    identity: ProbeIdentity,
    heartbeat_interval: Duration,
    active_tasks: AtomicU32,
    /// Set once the current socket's open has been handled
    opened: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        // Receiver dropped means nobody is interested any more
        let _ = self.events.send(event);
    }

    fn on_open(self: &Arc<Self>) {
        if self.opened.swap(true, Ordering::SeqCst) {
            return;
        }

        let register = match WsMessage::with_payload(MessageKind::Register, &self.identity.register_payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to encode register message");
                return;
            }
        };

        info!(probe_id = %self.identity.probe_id, "Registering probe");
        if let Err(e) = self.client.send_message(&register) {
            warn!(error = %e, "Failed to send register message");
            return;
        }
        self.emit(SessionEvent::Connected);
        self.start_heartbeat();
    }

    fn on_close(&self, info: &CloseInfo) {
        self.opened.store(false, Ordering::SeqCst);
        self.stop_heartbeat();
        self.emit(SessionEvent::Disconnected(info.clone()));
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let interval = self.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = shared.send_heartbeat() {
                    debug!(error = %e, "Heartbeat not sent");
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    fn send_heartbeat(&self) -> Result<()> {
        let payload = HeartbeatPayload {
            probe_id: self.identity.probe_id.clone(),
            status: "online".to_string(),
            cpu_usage: 0.0,
            mem_usage: 0.0,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
        };
        self.client
            .send_message(&WsMessage::with_payload(MessageKind::Heartbeat, &payload)?)
    }

    fn send_pong(&self) {
        let pong = WsMessage::new(MessageKind::Pong, json!({}));
        if let Err(e) = self.client.send_message(&pong) {
            debug!(error = %e, "Pong not sent");
        }
    }
}

/// Decode a routed payload, logging instead of failing the dispatch
fn decode<T: DeserializeOwned>(message: &WsMessage) -> Option<T> {
    match message.decode_data() {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(kind = %message.kind, error = %e, "Dropping malformed message");
            None
        }
    }
}

/// Probe protocol session bound to one client
///
/// Dropping the session unsubscribes it from the client and stops the
/// heartbeat. The client itself is left as it is.
pub struct ProbeSession {
    shared: Arc<SessionShared>,
    subscriptions: Mutex<Vec<(EventKind, Listener)>>,
}

impl ProbeSession {
    /// Attach a session to `client`
    ///
    /// If the client is already open, registration happens immediately.
    pub fn start(
        client: &EventClient,
        identity: ProbeIdentity,
        heartbeat_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            client: client.clone(),
            identity,
            heartbeat_interval,
            active_tasks: AtomicU32::new(0),
            opened: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
            events: tx,
        });

        let router = Arc::new(MessageRouter::new());
        Self::install_routes(&router, &shared);

        let mut subscriptions = vec![(EventKind::Message, router.attach(client))];

        let s = Arc::clone(&shared);
        subscriptions.push((
            EventKind::Open,
            client.on_fn(EventKind::Open, move |_| s.on_open()),
        ));

        let s = Arc::clone(&shared);
        subscriptions.push((
            EventKind::Close,
            client.on_fn(EventKind::Close, move |event| {
                if let ClientEvent::Close(info) = event {
                    s.on_close(info);
                }
            }),
        ));

        if client.is_connected() {
            shared.on_open();
        }

        let session = Self {
            shared,
            subscriptions: Mutex::new(subscriptions),
        };
        (session, rx)
    }

    fn install_routes(router: &MessageRouter, shared: &Arc<SessionShared>) {
        let s = Arc::clone(shared);
        router.route_fn(MessageKind::RegisterAck, move |msg| {
            let Some(ack) = decode::<RegisterAck>(msg) else { return };
            if ack.success {
                info!(probe_id = %ack.probe_id, message = %ack.message, "Registration accepted");
                s.emit(SessionEvent::Registered(ack));
            } else {
                warn!(message = %ack.message, "Registration rejected");
                s.emit(SessionEvent::RegistrationRejected(ack.message));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::HeartbeatAck, move |msg| {
            if let Some(ack) = decode(msg) {
                s.emit(SessionEvent::HeartbeatAck(ack));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::TaskAssign, move |msg| {
            if let Some(task) = decode::<TaskAssign>(msg) {
                info!(
                    task_id = %task.task_id,
                    task_type = %task.task_type,
                    target = %task.target,
                    "Received task"
                );
                s.emit(SessionEvent::TaskAssigned(task));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::TaskCancel, move |msg| {
            if let Some(cancel) = decode::<TaskCancel>(msg) {
                info!(execution_id = %cancel.execution_id, reason = %cancel.reason, "Task cancelled");
                s.emit(SessionEvent::TaskCancelled(cancel));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::Config, move |msg| {
            if let Some(config) = decode(msg) {
                s.emit(SessionEvent::ConfigUpdated(config));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::Error, move |msg| {
            if let Some(error) = decode::<ErrorPayload>(msg) {
                warn!(code = %error.code, message = %error.message, "Server reported error");
                s.emit(SessionEvent::ServerError(error));
            }
        });

        let s = Arc::clone(shared);
        router.route_fn(MessageKind::Ping, move |_| s.send_pong());

        router.route_fn(MessageKind::Pong, |_| {});

        router.set_fallback(|inbound| debug!(frame = ?inbound, "Ignoring unhandled frame"));
    }

    pub fn probe_id(&self) -> &str {
        &self.shared.identity.probe_id
    }

    pub fn identity(&self) -> &ProbeIdentity {
        &self.shared.identity
    }

    /// Number of running tasks reported in heartbeats
    pub fn set_active_tasks(&self, count: u32) {
        self.shared.active_tasks.store(count, Ordering::Relaxed);
    }

    /// Send a heartbeat now, outside the regular schedule
    pub fn heartbeat(&self) -> Result<()> {
        self.shared.send_heartbeat()
    }

    /// Upload an execution result; an empty `probe_id` is filled in
    pub fn report_result(&self, mut result: TaskResult) -> Result<()> {
        if result.probe_id.is_empty() {
            result.probe_id = self.shared.identity.probe_id.clone();
        }
        self.shared
            .client
            .send_message(&WsMessage::with_payload(MessageKind::TaskResult, &result)?)
    }

    /// Report execution progress; an empty `probe_id` is filled in
    pub fn report_status(&self, mut status: TaskStatusUpdate) -> Result<()> {
        if status.probe_id.is_empty() {
            status.probe_id = self.shared.identity.probe_id.clone();
        }
        self.shared
            .client
            .send_message(&WsMessage::with_payload(MessageKind::TaskStatus, &status)?)
    }

    /// Detach from the client and stop heartbeating
    pub fn stop(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (kind, listener) in subscriptions {
            self.shared.client.off(kind, &listener);
        }
        self.shared.stop_heartbeat();
    }
}

impl Drop for ProbeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSession")
            .field("probe_id", &self.shared.identity.probe_id)
            .field("heartbeat_interval", &self.shared.heartbeat_interval)
            .finish()
    }
}
