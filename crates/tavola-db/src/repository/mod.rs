//! # Repository Module
//!
//! Repository implementations for the offline queue.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Reconciler / OfflineGateway                                           │
//! │       │                                                                 │
//! │       │  db.offline_queue().list_pending(WriteKind::Sale)              │
//! │       ▼                                                                 │
//! │  OfflineQueueRepository                SyncStatusRepository            │
//! │  ├── enqueue                           ├── get                         │
//! │  ├── list_pending / list_failed        ├── compute                     │
//! │  ├── mark_synced                       └── set_phase                   │
//! │  ├── record_attempt / log_attempt                                      │
//! │  └── purge                                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OfflineQueueRepository`](offline_queue::OfflineQueueRepository) - Queued writes and sync log
//! - [`SyncStatusRepository`](sync_status::SyncStatusRepository) - Aggregate sync status

pub mod offline_queue;
pub mod sync_status;
