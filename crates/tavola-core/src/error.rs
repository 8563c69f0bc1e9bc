//! # Error Types
//!
//! Domain error types for tavola-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tavola-core errors (this file)                                        │
//! │  └── CoreError        - Parsing and wire decoding failures             │
//! │                                                                         │
//! │  tavola-db errors (separate crate)                                     │
//! │  └── DbError          - Offline queue storage failures                 │
//! │                                                                         │
//! │  tavola-sync errors (separate crate)                                   │
//! │  └── SyncError        - Hub, discovery and reconciler failures         │
//! │                                                                         │
//! │  Flow: CoreError → DbError / SyncError → logged at the boundary        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core parsing and decoding errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The `type` query parameter named no known device role.
    #[error("Invalid role: '{0}'. Valid options: pos, register, kitchen, waiter")]
    InvalidRole(String),

    /// Unknown offline write kind.
    #[error("Invalid write kind: '{0}'. Valid options: order, sale, invoice")]
    InvalidWriteKind(String),

    /// Unknown sync phase stored in the status row.
    #[error("Invalid sync phase: '{0}'")]
    InvalidSyncPhase(String),

    /// The envelope carried a `type` the hub does not know.
    ///
    /// ## When This Occurs
    /// - A newer client speaks an event kind this hub predates
    /// - A typo on the client side
    ///
    /// The hub logs and drops these; the connection stays open.
    #[error("Unknown event type: '{0}'")]
    UnknownEventKind(String),

    /// The envelope was known but its `data` did not fit the payload shape.
    #[error("Invalid payload for '{kind}': {message}")]
    InvalidPayload { kind: String, message: String },
}

impl CoreError {
    /// Creates an InvalidPayload error.
    pub fn invalid_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Returns true when the frame named an event kind this hub does not know.
    pub fn is_unknown_kind(&self) -> bool {
        matches!(self, CoreError::UnknownEventKind(_))
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
