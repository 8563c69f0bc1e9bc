//! # tavola-db: Offline Queue Storage
//!
//! SQLite storage for writes the register could not deliver to the central
//! store, with the aggregate sync status the register UI reads.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Write Path                               │
//! │                                                                         │
//! │  Register write (order / sale / invoice)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  OfflineGateway (tavola-sync) ── online ──► central store              │
//! │       │ offline                                                         │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tavola-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ OfflineQueue   │    │  (embedded)  │  │   │
//! │  │   │  SqlitePool   │    │ SyncStatus     │    │ 001_offline  │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       ▲                                                                 │
//! │       │ replay                                                          │
//! │  Reconciler (tavola-sync)                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tavola_core::WriteKind;
//! use tavola_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("offline.db")).await?;
//! db.offline_queue().enqueue(WriteKind::Order, "A-17", &payload).await?;
//! let status = db.sync_status().compute().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::offline_queue::{AttemptOutcome, OfflineQueueRepository, PurgeReport};
pub use repository::sync_status::SyncStatusRepository;
