//! # Feed Error Types
//!
//! Error types for feed operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Feed Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  Timeout, TLS   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  None of these escape the channel as panics. Transport failures become │
//! │  state transitions plus an `on_error` notification.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Feed error type covering configuration, transport and protocol failures.
#[derive(Debug, Error)]
pub enum FeedError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid feed configuration.
    #[error("Invalid feed configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection dropped unexpectedly.
    #[error("Disconnected from feed server")]
    Disconnected,

    /// Connection attempt timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation requires an open connection.
    #[error("Not connected to feed server")]
    NotConnected,

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Inbound message could not be interpreted.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Outbound message could not be serialized.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The channel has been torn down.
    #[error("Feed channel has been torn down")]
    TornDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<fleet_core::CoreError> for FeedError {
    fn from(err: fleet_core::CoreError) -> Self {
        match err {
            fleet_core::CoreError::SerializationFailed(msg) => FeedError::SerializationFailed(msg),
            other => FeedError::InvalidMessage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => FeedError::Disconnected,
            WsError::AlreadyClosed => FeedError::Disconnected,
            WsError::Protocol(p) => FeedError::WebSocketError(p.to_string()),
            WsError::Io(io) => FeedError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => FeedError::TlsError(tls.to_string()),
            other => FeedError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for FeedError {
    fn from(err: toml::de::Error) -> Self {
        FeedError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for FeedError {
    fn from(err: toml::ser::Error) -> Self {
        FeedError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl FeedError {
    /// Returns true if a later connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionFailed(_)
                | FeedError::Disconnected
                | FeedError::Timeout(_)
                | FeedError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FeedError::InvalidConfig(_)
                | FeedError::InvalidUrl(_)
                | FeedError::ConfigLoadFailed(_)
                | FeedError::ConfigSaveFailed(_)
        )
    }
}
