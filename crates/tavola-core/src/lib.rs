//! # tavola-core: Pure Types for Tavola Realtime Sync
//!
//! Shared vocabulary for the hub, the discovery client and the offline
//! queue. Nothing in this crate touches a socket, a file or a database.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Tavola Realtime Architecture                        │
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐                │
//! │  │   Register   │   │   Kitchen    │   │   Waiter     │  Devices       │
//! │  │   (pos)      │   │   display    │   │  handhelds   │                │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘                │
//! │         │  JSON envelopes  │                  │                         │
//! │  ┌──────▼──────────────────▼──────────────────▼───────────────────┐    │
//! │  │                   tavola-sync (hub, discovery)                 │    │
//! │  └──────────────────────────────┬─────────────────────────────────┘    │
//! │                                 │                                       │
//! │  ┌──────────────────────────────▼─────────────────────────────────┐    │
//! │  │               ★ tavola-core (THIS CRATE) ★                     │    │
//! │  │                                                                │    │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                 │    │
//! │  │   │   types   │  │  events   │  │   error   │                 │    │
//! │  │   │ Role      │  │ EventKind │  │ CoreError │                 │    │
//! │  │   │ Scope     │  │ HubEvent  │  │           │                 │    │
//! │  │   │ QueuedW.  │  │ EventMsg  │  │           │                 │    │
//! │  │   └───────────┘  └───────────┘  └───────────┘                 │    │
//! │  │                                                                │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                            │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Roles, scopes, queued writes, sync status
//! - [`events`] - Wire envelope and typed event payloads
//! - [`error`] - Core error types
//!
//! ## Example
//!
//! ```rust
//! use tavola_core::{EventKind, EventMessage, HubEvent, Role, Scope};
//!
//! let msg = EventMessage::decode(
//!     r#"{"type":"kitchen_ack","data":{"order_id":42,"order_number":"A-17"}}"#,
//! ).unwrap();
//! assert_eq!(msg.kind(), EventKind::KitchenAck);
//! assert!(matches!(msg.event, HubEvent::KitchenAck(_)));
//! assert!(Scope::Role(Role::Waiter).matches(Role::Waiter));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod events;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Replay attempts a queued write gets before it stops being retried.
///
/// Exhausted entries stay in the queue (and in the pending counts) so an
/// operator can inspect `last_error`.
pub const MAX_SYNC_ATTEMPTS: i64 = 3;

/// mDNS service type the hub advertises and handhelds browse for.
pub const HUB_SERVICE_TYPE: &str = "_tavola-hub._tcp.local.";

/// Default hub port.
pub const DEFAULT_HUB_PORT: u16 = 3001;

/// Service name reported by the hub health endpoint.
pub const HUB_SERVICE_NAME: &str = "tavola-hub";
