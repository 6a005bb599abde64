//! Configuration for atlas-link
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (ATLAS_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{self, ClientConfig};
use crate::error::{Error, Result};
use crate::session::{self, ProbeIdentity};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Server connection settings
    pub server: ServerSettings,

    /// Probe identity and session settings
    pub probe: ProbeSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server host and port, used to derive `ws://{host}/ws`
    pub host: String,

    /// Full WebSocket URL; overrides `host` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Token sent with probe registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Fixed delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Automatic reconnect attempts after an unexpected close
    pub max_reconnect_attempts: u32,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Probe identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Display name (defaults to the hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub location: String,

    pub region: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Test types advertised at registration
    pub capabilities: Vec<String>,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Where the stable probe id is stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_file: Option<String>,

    /// Extra registration metadata (asn, isp, ...)
    pub metadata: HashMap<String, String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            url: None,
            auth_token: None,
            reconnect_delay_ms: client::DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            max_reconnect_attempts: client::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout_ms: 10000,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            name: None,
            location: String::new(),
            region: String::new(),
            latitude: None,
            longitude: None,
            capabilities: ["icmp_ping", "tcp_ping", "traceroute", "http_test"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            heartbeat_interval_ms: session::DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            id_file: None,
            metadata: HashMap::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl LinkConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::parse(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse TOML configuration text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            // Current directory
            Some(PathBuf::from("atlas-link.toml")),
            // User config directory
            dirs::config_dir().map(|p| p.join("atlas").join("link.toml")),
            // Home directory
            dirs::home_dir().map(|p| p.join(".atlas").join("link.toml")),
            // System config (Linux)
            Some(PathBuf::from("/etc/atlas/link.toml")),
        ];

        for path in search_paths.into_iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Server settings
        if let Ok(val) = std::env::var("ATLAS_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("ATLAS_SERVER_URL") {
            self.server.url = Some(val);
        }
        if let Ok(val) = std::env::var("ATLAS_AUTH_TOKEN") {
            self.server.auth_token = Some(val);
        }
        if let Ok(val) = std::env::var("ATLAS_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.server.reconnect_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("ATLAS_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.server.max_reconnect_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("ATLAS_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.server.connect_timeout_ms = n;
            }
        }

        // Probe settings
        if let Ok(val) = std::env::var("ATLAS_PROBE_NAME") {
            self.probe.name = Some(val);
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_LOCATION") {
            self.probe.location = val;
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_REGION") {
            self.probe.region = val;
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_LATITUDE") {
            if let Ok(n) = val.parse() {
                self.probe.latitude = Some(n);
            }
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_LONGITUDE") {
            if let Ok(n) = val.parse() {
                self.probe.longitude = Some(n);
            }
        }
        if let Ok(val) = std::env::var("ATLAS_HEARTBEAT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.probe.heartbeat_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_ASN") {
            self.probe.metadata.insert("asn".to_string(), val);
        }
        if let Ok(val) = std::env::var("ATLAS_PROBE_ISP") {
            self.probe.metadata.insert("isp".to_string(), val);
        }

        // Logging settings
        if let Ok(val) = std::env::var("ATLAS_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("ATLAS_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("ATLAS_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref file) = self.probe.id_file {
            self.probe.id_file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.url.is_none() && self.server.host.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "server.host",
                "server host cannot be empty when no url is set",
            ));
        }

        let url = self.resolved_url();
        client::validate_url(&url)
            .map_err(|e| Error::config_field_invalid("server.url", e.to_string()))?;

        if self.server.reconnect_delay_ms == 0 {
            return Err(Error::config_field_invalid(
                "server.reconnect_delay_ms",
                "reconnect delay must be greater than zero",
            ));
        }

        if self.probe.heartbeat_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "probe.heartbeat_interval_ms",
                "heartbeat interval must be greater than zero",
            ));
        }

        if let Some(lat) = self.probe.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(Error::config_field_invalid(
                    "probe.latitude",
                    format!("latitude {} is outside -90..90", lat),
                ));
            }
        }
        if let Some(lon) = self.probe.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(Error::config_field_invalid(
                    "probe.longitude",
                    format!("longitude {} is outside -180..180", lon),
                ));
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// WebSocket URL to connect to
    pub fn resolved_url(&self) -> String {
        match &self.server.url {
            Some(url) => url.clone(),
            None => client::default_url(&self.server.host),
        }
    }

    /// Client settings derived from this configuration
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.resolved_url(),
            max_reconnect_attempts: self.server.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.server.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.server.connect_timeout_ms),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.probe.heartbeat_interval_ms)
    }

    /// Configured probe name, or the hostname
    pub fn probe_name(&self) -> String {
        if let Some(name) = &self.probe.name {
            return name.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "atlas-probe".to_string())
    }

    /// Location of the persisted probe id
    pub fn probe_id_path(&self) -> PathBuf {
        self.probe
            .id_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(session::default_probe_id_path)
    }

    /// Registration identity for a given probe id
    pub fn probe_identity(&self, probe_id: impl Into<String>) -> ProbeIdentity {
        let mut identity = ProbeIdentity::new(probe_id, self.probe_name())
            .with_coordinates(self.probe.latitude, self.probe.longitude);
        identity.location = self.probe.location.clone();
        identity.region = self.probe.region.clone();
        identity.capabilities = self.probe.capabilities.clone();
        identity.auth_token = self.server.auth_token.clone().unwrap_or_default();
        identity
            .metadata
            .extend(self.probe.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        identity
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.server.auth_token.is_some() {
            config.server.auth_token = Some("********".to_string());
        }
        config
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location for `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atlas")
        .join("link.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# atlas-link configuration

[server]
# Server host; the client connects to ws://{host}/ws
host = "localhost:8080"

# Full WebSocket URL, overrides host
# url = "wss://atlas.example.com/ws"

# Token sent when registering as a probe
# auth_token = ""

# Fixed delay between reconnect attempts in milliseconds
reconnect_delay_ms = 3000

# Reconnect attempts after an unexpected close before going idle
max_reconnect_attempts = 5

# Handshake timeout in milliseconds
connect_timeout_ms = 10000

[probe]
# Display name (defaults to the hostname)
# name = "edge-fra-1"

location = ""
region = ""

# Coordinates shown on the probe map
# latitude = 50.11
# longitude = 8.68

# Test types advertised at registration
capabilities = ["icmp_ping", "tcp_ping", "traceroute", "http_test"]

# Heartbeat interval in milliseconds
heartbeat_interval_ms = 30000

# Where the stable probe id is stored
# id_file = "~/.config/atlas/probe_id.txt"

[probe.metadata]
# asn = "AS13335"
# isp = "Example ISP"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.atlas/logs/link.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
