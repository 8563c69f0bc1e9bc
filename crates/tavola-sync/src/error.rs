//! # Sync Error Types
//!
//! Error types for the hub, discovery and reconciliation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  BindFailed     │  │  InvalidMessage         │ │
//! │  │  MissingDeviceId│  │  Connection     │  │  UnknownEventKind       │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Serialization          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │   Discovery     │  │   Central Store         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  NoServerFound  │  │  Unavailable            │ │
//! │  │                 │  │  Registration   │  │  Rejected               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Nothing per-connection or per-write is fatal to the process.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering hub, discovery and reconciler failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid URL (hub or central store).
    #[error("Invalid URL: {0}")]
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
    /// The hub could not bind its listening socket.
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer went away.
    #[error("Disconnected from hub")]
    Disconnected,

    /// Operation timed out.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Frame could not be decoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Frame named an unknown event type.
    #[error("Unknown event type: {0}")]
    UnknownEventKind(String),

    /// Failed to serialize a frame.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Offline queue storage failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    /// The discovery cascade ran out of strategies or time.
    #[error("No hub found on the local network")]
    NoServerFound,

    /// The mDNS daemon failed.
    #[error("mDNS error: {0}")]
    MdnsError(String),

    /// The responder could not register the service record.
    #[error("Service registration failed: {0}")]
    RegistrationFailed(String),

    // =========================================================================
    // Central Store Errors
    // =========================================================================
    /// The central store could not be reached.
    #[error("Central store unavailable: {0}")]
    CentralStoreUnavailable(String),

    /// The central store answered but refused the write.
    #[error("Central store rejected write ({status}): {message}")]
    CentralStoreRejected { status: u16, message: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// A business-layer callback (status update, acknowledgment, print) failed.
    #[error("Callback failed: {0}")]
    CallbackFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Component is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tavola_db::DbError> for SyncError {
    fn from(err: tavola_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<tavola_core::CoreError> for SyncError {
    fn from(err: tavola_core::CoreError) -> Self {
        match err {
            tavola_core::CoreError::UnknownEventKind(kind) => SyncError::UnknownEventKind(kind),
            other => SyncError::InvalidMessage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            SyncError::CentralStoreUnavailable(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::CentralStoreRejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SyncError::CentralStoreUnavailable(err.to_string())
        }
    }
}

impl From<mdns_sd::Error> for SyncError {
    fn from(err: mdns_sd::Error) -> Self {
        SyncError::MdnsError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Central store unavailable, or a 5xx answer
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Protocol errors
    /// - 4xx answers from the central store
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Disconnected
            | SyncError::Timeout(_)
            | SyncError::WebSocketError(_)
            | SyncError::CentralStoreUnavailable(_) => true,
            SyncError::CentralStoreRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
