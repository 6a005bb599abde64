//! Error types for atlas-link
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for the CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for atlas-link operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    TransportConstruction = 301,
    NotConnected = 302,
    ConnectionLost = 303,
    InvalidUrl = 304,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    ProtocolUnexpected = 402,
    Serialization = 403,
}

impl ErrorCode {
    /// Get the string code (e.g., "E302")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The target address is not a usable ws:// or wss:// URL
    #[error("Invalid server URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The socket could not be created at all
    #[error("Failed to create transport for {url}: {message}")]
    TransportConstruction { url: String, message: String },

    /// Connection attempt failed
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// `send` was called while the connection is not open
    #[error("Not connected to server")]
    NotConnected,

    /// Connection lost
    #[error("Lost connection to server: {message}")]
    ConnectionLost { message: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Message of a kind the receiver did not expect
    #[error("Unexpected {kind} message: {message}")]
    ProtocolUnexpected { kind: String, message: String },
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::WebSocket(_) => ErrorCode::ConnectionFailed,
            Error::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Error::TransportConstruction { .. } => ErrorCode::TransportConstruction,
            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::NotConnected => ErrorCode::NotConnected,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,

            Error::Json(_) => ErrorCode::Serialization,
            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::ProtocolUnexpected { .. } => ErrorCode::ProtocolUnexpected,
        }
    }

    /// Transport-level problems that the reconnect policy recovers from
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionLost { .. }
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'atlas-link config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'atlas-link config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::InvalidUrl { .. } => Some(
                "The server URL must start with ws:// or wss://, e.g. ws://localhost:8080/ws."
            ),
            Error::ConnectionFailed { .. } => Some(
                "Check your network connection and verify the server URL is correct."
            ),
            Error::NotConnected => Some(
                "Wait for the connection to open before sending, or check is_connected() first."
            ),
            Error::ConnectionLost { .. } => Some(
                "Connection was interrupted. The client will retry a few times before going idle."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::NotConnected.as_str(), "E302");
        assert_eq!(ErrorCode::Serialization.as_str(), "E403");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::IoWrite.exit_code(), 20);
        assert_eq!(ErrorCode::TransportConstruction.exit_code(), 30);
        assert_eq!(ErrorCode::ProtocolMalformed.exit_code(), 40);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotConnected.code(), ErrorCode::NotConnected);
        assert_eq!(
            Error::connection_failed("ws://probe", "refused").code(),
            ErrorCode::ConnectionFailed
        );
        assert_eq!(
            Error::invalid_url("http://x", "bad scheme").code(),
            ErrorCode::InvalidUrl
        );
    }

    #[test]
    fn test_converted_errors_keep_their_codes() {
        let json: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(json.code(), ErrorCode::Serialization);
        assert_eq!(json.exit_code(), 40);

        let parse = Error::ConfigParse {
            message: "expected a table".to_string(),
            source: None,
        };
        assert_eq!(parse.code(), ErrorCode::ConfigParseError);
        assert!(parse.suggestion().is_some());
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::connection_failed("url", "test").is_retryable());
        assert!(Error::ConnectionLost { message: "reset".into() }.is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::config_field_invalid("server.url", "empty").is_retryable());
    }

    #[test]
    fn test_format_for_terminal() {
        let formatted = Error::NotConnected.format_for_terminal();
        assert!(formatted.contains("E302"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::invalid_url("ftp://x", "unsupported scheme").format_for_log();
        assert!(formatted.starts_with("[E304]"));
        assert!(!formatted.contains("\x1b["));
    }
}
