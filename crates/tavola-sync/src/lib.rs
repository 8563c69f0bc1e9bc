//! # tavola-sync: Realtime Hub and Offline Sync for Tavola
//!
//! This crate keeps a restaurant's devices talking to each other on the local
//! network and keeps the register's writes safe while the central store is
//! out of reach.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tavola Sync Layer                              │
//! │                                                                         │
//! │   handhelds / kitchen displays                 register                 │
//! │  ┌────────────────────────────┐        ┌──────────────────────────────┐ │
//! │  │ Discovery                  │        │ HubServer (axum)             │ │
//! │  │  emulator → mDNS → cache → │ ─────► │  /ws?type=pos|kitchen|waiter │ │
//! │  │  heuristics → /24 sweep    │  ws    │  /health                     │ │
//! │  │                            │        │        │                     │ │
//! │  │ HubClient                  │ ◄───── │        ▼                     │ │
//! │  │  tungstenite + backoff     │ events │ Hub registry loop            │ │
//! │  └────────────────────────────┘        │  sessions, routing table,    │ │
//! │                                        │  heartbeat, eviction         │ │
//! │                                        │                              │ │
//! │                                        │ Responder (mDNS advertise)   │ │
//! │                                        │                              │ │
//! │                                        │ OfflineGateway ──► queue     │ │
//! │                                        │ Reconciler ──► CentralStore  │ │
//! │                                        └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Realtime Hub
//! - [`hub`] - Registry control loop and `HubHandle`
//! - [`router`] - Routing table and side-effect callbacks
//! - [`server`] - axum WebSocket and health endpoints
//!
//! ### Discovery
//! - [`responder`] - mDNS advertisement of the running hub
//! - [`discovery`] - Client-side discovery cascade
//! - [`cache`] - Last verified hub address
//! - [`client`] - Reconnecting hub client
//!
//! ### Offline Sync
//! - [`central`] - Central store client and the register write path
//! - [`reconciler`] - Background replay of the offline queue
//!
//! ### Shared
//! - [`config`] - Configuration (device, hub, discovery, offline, client)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tavola_sync::{Hub, HubConfig, HubServer, TavolaConfig};
//!
//! let config = TavolaConfig::load_or_default(None);
//!
//! let hub = Hub::new(HubConfig::from(&config.hub)).start();
//! let server = HubServer::new(config.hub.clone(), hub.clone()).start().await?;
//! println!("Hub listening on {}", server.local_addr());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

// Realtime hub
pub mod hub;
pub mod router;
pub mod server;

// Discovery
pub mod cache;
pub mod client;
pub mod discovery;
pub mod responder;

// Offline sync
pub mod central;
pub mod reconciler;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    ClientSettings, DeviceConfig, DiscoverySettings, HubSettings, OfflineSettings, TavolaConfig,
};
pub use error::{SyncError, SyncResult};

pub use hub::{Hub, HubConfig, HubHandle, Session, SessionInfo};
pub use router::{NoOpPrinter, NoOpStatusSink, OrderStatusSink, ReceiptPrinter};
pub use server::{HubServer, HubServerHandle};

pub use cache::{CachedHub, DiscoveryCache};
pub use client::{hub_url, ConnectionState, HubClient, HubClientConfig, HubClientHandle};
pub use discovery::{Discovery, HttpProber, MdnsBrowser, NetworkInfo, Prober, ServiceBrowser, SystemNetwork};
pub use responder::Responder;

pub use central::{CentralStore, HttpCentralStore, OfflineGateway, WriteOutcome};
pub use reconciler::{CycleReport, Reconciler, ReconcilerConfig, ReconcilerHandle};
