//! # Domain Types
//!
//! Device roles, broadcast scopes and the offline queue records.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Role       │   │      Scope      │   │   WriteKind     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Register (pos) │   │  All            │   │  Order          │       │
//! │  │  Kitchen        │   │  Role(Role)     │   │  Sale           │       │
//! │  │  Waiter         │   │                 │   │  Invoice        │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  QueuedWrite    │   │   SyncPhase     │   │   SyncStatus    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  business_key   │   │  Idle           │   │  last_synced_at │       │
//! │  │  payload (JSON) │   │  Syncing        │   │  pending/kind   │       │
//! │  │  attempts       │   │  Failed         │   │  failed/kind    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::MAX_SYNC_ATTEMPTS;

// =============================================================================
// Role
// =============================================================================

/// The kind of device on the other end of a hub connection.
///
/// Classified once from the `?type=` query parameter at handshake time and
/// fixed for the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Desktop register. Wire name `pos`, `register` is accepted on input.
    #[default]
    #[serde(rename = "pos", alias = "register")]
    Register,
    /// Kitchen display.
    Kitchen,
    /// Waiter handheld.
    Waiter,
}

impl Role {
    /// Every role, in routing-table order.
    pub const ALL: [Role; 3] = [Role::Register, Role::Kitchen, Role::Waiter];

    /// Returns the wire name used in `?type=` and in `auth_response`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Register => "pos",
            Role::Kitchen => "kitchen",
            Role::Waiter => "waiter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pos" | "register" => Ok(Role::Register),
            "kitchen" => Ok(Role::Kitchen),
            "waiter" => Ok(Role::Waiter),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Which connections a published event reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every registered connection.
    All,
    /// Only connections of one role.
    Role(Role),
}

impl Scope {
    /// Returns true if a connection with `role` falls inside this scope.
    #[inline]
    pub fn matches(&self, role: Role) -> bool {
        match self {
            Scope::All => true,
            Scope::Role(r) => *r == role,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Role(role) => write!(f, "role={}", role),
        }
    }
}

impl From<Role> for Scope {
    fn from(role: Role) -> Self {
        Scope::Role(role)
    }
}

// =============================================================================
// Write Kind
// =============================================================================

/// The business entity a queued offline write carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Order,
    Sale,
    Invoice,
}

impl WriteKind {
    /// Every kind, in reconciliation order.
    pub const ALL: [WriteKind; 3] = [WriteKind::Order, WriteKind::Sale, WriteKind::Invoice];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Order => "order",
            WriteKind::Sale => "sale",
            WriteKind::Invoice => "invoice",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "order" => Ok(WriteKind::Order),
            "sale" => Ok(WriteKind::Sale),
            "invoice" => Ok(WriteKind::Invoice),
            other => Err(CoreError::InvalidWriteKind(other.to_string())),
        }
    }
}

// =============================================================================
// Queued Write
// =============================================================================

/// A write the register could not deliver to the central store.
///
/// ## Lifecycle
/// ```text
/// enqueue ──► pending (attempts=0)
///                │
///      ┌─────────┴──────────┐
///      ▼                    ▼
///  submit ok           submit failed
///  synced=true         attempts += 1, last_error set
///                           │
///                           ▼
///                   attempts >= 3: no longer replayed,
///                   still counted as pending and failed
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct QueuedWrite {
    pub id: i64,
    pub kind: WriteKind,
    /// Unique business key (order number, sale id, invoice number).
    pub business_key: String,
    /// Serialized JSON snapshot of the entity at enqueue time.
    pub payload: String,
    pub synced: bool,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl QueuedWrite {
    /// Returns true once the entry has used up its replay attempts.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_SYNC_ATTEMPTS
    }

    /// Parses the stored payload snapshot.
    pub fn payload_json(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| CoreError::invalid_payload(self.kind.as_str(), e.to_string()))
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Phase of the reconciler as last recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Syncing => "syncing",
            SyncPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncPhase::Idle),
            "syncing" => Ok(SyncPhase::Syncing),
            "failed" => Ok(SyncPhase::Failed),
            other => Err(CoreError::InvalidSyncPhase(other.to_string())),
        }
    }
}

/// One counter per write kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KindCounts {
    pub order: i64,
    pub sale: i64,
    pub invoice: i64,
}

impl KindCounts {
    pub fn get(&self, kind: WriteKind) -> i64 {
        match kind {
            WriteKind::Order => self.order,
            WriteKind::Sale => self.sale,
            WriteKind::Invoice => self.invoice,
        }
    }

    pub fn set(&mut self, kind: WriteKind, value: i64) {
        match kind {
            WriteKind::Order => self.order = value,
            WriteKind::Sale => self.sale = value,
            WriteKind::Invoice => self.invoice = value,
        }
    }

    pub fn total(&self) -> i64 {
        self.order + self.sale + self.invoice
    }
}

/// Aggregate state of the offline queue.
///
/// Always recomputed from the queue contents, never patched incrementally:
/// `pending.get(k)` equals the number of unsynced entries of kind `k` at
/// `computed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub phase: SyncPhase,
    /// Unsynced entries per kind, exhausted ones included.
    pub pending: KindCounts,
    /// Unsynced entries per kind that reached the attempt ceiling.
    pub failed: KindCounts,
    #[ts(as = "String")]
    pub computed_at: DateTime<Utc>,
}

impl SyncStatus {
    /// Returns true if nothing is waiting to be replayed.
    pub fn is_clear(&self) -> bool {
        self.pending.total() == 0
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            last_synced_at: None,
            phase: SyncPhase::Idle,
            pending: KindCounts::default(),
            failed: KindCounts::default(),
            computed_at: Utc::now(),
        }
    }
}
