//! # Realtime Hub Registry
//!
//! The single owner of the connection registry. Every registration,
//! deregistration, direct send and fan-out is a command to one control loop.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Hub Control Loop                                 │
//! │                                                                         │
//! │   socket tasks / business layer                                        │
//! │        │          │            │                                        │
//! │   connect()   publish()   handle_inbound()        HubHandle (Clone)    │
//! │        │          │            │                                        │
//! │        └──────────┴─────┬──────┘                                        │
//! │                         ▼  mpsc<HubCommand>                             │
//! │              ┌─────────────────────────┐                                │
//! │              │        Registry         │   ◄── heartbeat tick (30 s)    │
//! │              │  HashMap<Uuid, Conn>    │                                │
//! │              └───────────┬─────────────┘                                │
//! │                          │ try_send(Arc<str>)   one encode per publish  │
//! │          ┌───────────────┼───────────────┐                              │
//! │          ▼               ▼               ▼                              │
//! │    [queue: pos]   [queue: kitchen]  [queue: waiter]   bounded           │
//! │          │               │               │                              │
//! │      writer task     writer task     writer task     (server.rs)        │
//! │                                                                         │
//! │  BACKPRESSURE: a full queue evicts that connection. Publishers never   │
//! │  wait on a slow consumer.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tavola_core::{AuthResponse, EventMessage, Heartbeat, HubEvent, Role, Scope};

use crate::config::HubSettings;
use crate::error::{SyncError, SyncResult};
use crate::router::{HubCallbacks, OrderStatusSink, ReceiptPrinter};

/// One encoded text frame, shared by every queue it is delivered to.
pub type Frame = Arc<str>;

/// Command channel depth for the control loop.
const COMMAND_BUFFER: usize = 256;

// =============================================================================
// Hub Configuration
// =============================================================================

/// Runtime parameters for the registry loop.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before eviction.
    pub queue_capacity: usize,
    /// Period of the heartbeat broadcast.
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        HubConfig {
            queue_capacity: settings.queue_capacity.max(1),
            heartbeat_interval: settings.heartbeat_interval(),
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Public description of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub role: Role,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// What a socket task gets back from `connect`: its identity and the
/// receiving end of its private outbound queue.
#[derive(Debug)]
pub struct Session {
    pub info: SessionInfo,
    pub outbound: mpsc::Receiver<Frame>,
}

struct Connection {
    info: SessionInfo,
    tx: mpsc::Sender<Frame>,
}

#[derive(Debug)]
enum HubCommand {
    Register {
        role: Role,
        addr: SocketAddr,
        reply: oneshot::Sender<Session>,
    },
    Deregister {
        id: Uuid,
    },
    Publish {
        frame: Frame,
        scopes: Vec<Scope>,
        exclude: Option<Uuid>,
    },
    SendTo {
        id: Uuid,
        frame: Frame,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Shutdown,
}

// =============================================================================
// Hub Handle
// =============================================================================

/// Cloneable handle to the registry loop.
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
    pub(crate) callbacks: Arc<HubCallbacks>,
}

impl HubHandle {
    /// Registers a connection and queues its `auth_response` welcome.
    pub async fn connect(&self, role: Role, addr: SocketAddr) -> SyncResult<Session> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Register { role, addr, reply }).await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Hub dropped registration reply".into()))
    }

    /// Removes a connection. Unknown and already-removed ids are ignored.
    pub async fn disconnect(&self, id: Uuid) -> SyncResult<()> {
        self.send(HubCommand::Deregister { id }).await
    }

    /// Encodes `message` once and fans it out to every connection matching
    /// any of `scopes`, skipping `exclude`.
    pub async fn publish(
        &self,
        message: EventMessage,
        scopes: &[Scope],
        exclude: Option<Uuid>,
    ) -> SyncResult<()> {
        let frame: Frame = message.encode()?.into();
        self.send(HubCommand::Publish {
            frame,
            scopes: scopes.to_vec(),
            exclude,
        })
        .await
    }

    /// Delivers `message` to a single session.
    pub async fn send_to(&self, id: Uuid, message: EventMessage) -> SyncResult<()> {
        let frame: Frame = message.encode()?.into();
        self.send(HubCommand::SendTo { id, frame }).await
    }

    /// Number of registered connections.
    ///
    /// The reply comes from the loop, so it also acts as a barrier: every
    /// command sent before it has been applied.
    pub async fn connection_count(&self) -> SyncResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply }).await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Hub dropped count reply".into()))
    }

    /// Current connections.
    pub async fn snapshot(&self) -> SyncResult<Vec<SessionInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply }).await?;
        rx.await
            .map_err(|_| SyncError::ChannelError("Hub dropped snapshot reply".into()))
    }

    /// Stops the loop and drops every outbound queue.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(HubCommand::Shutdown).await
    }

    async fn send(&self, cmd: HubCommand) -> SyncResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Builder for the registry loop.
pub struct Hub {
    config: HubConfig,
    callbacks: HubCallbacks,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Hub {
            config,
            callbacks: HubCallbacks::default(),
        }
    }

    /// Business-layer hook for kitchen status changes and acknowledgments.
    pub fn with_status_sink(mut self, sink: Arc<dyn OrderStatusSink>) -> Self {
        self.callbacks.status = sink;
        self
    }

    /// Business-layer hook for `print_receipt`.
    pub fn with_printer(mut self, printer: Arc<dyn ReceiptPrinter>) -> Self {
        self.callbacks.printer = printer;
        self
    }

    /// Spawns the control loop and returns a handle to it.
    pub fn start(self) -> HubHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        let registry = Registry {
            config: self.config,
            connections: HashMap::new(),
        };

        tokio::spawn(async move {
            registry.run(cmd_rx).await;
        });

        HubHandle {
            cmd_tx,
            callbacks: Arc::new(self.callbacks),
        }
    }
}

// =============================================================================
// Registry Loop
// =============================================================================

struct Registry {
    config: HubConfig,
    connections: HashMap<Uuid, Connection>,
}

impl Registry {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<HubCommand>) {
        info!(
            queue_capacity = self.config.queue_capacity,
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            "Hub registry started"
        );

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HubCommand::Shutdown) | None => {
                            info!(connections = self.connections.len(), "Hub registry shutting down");
                            self.connections.clear();
                            break;
                        }
                        Some(cmd) => self.apply(cmd),
                    }
                }
                _ = heartbeat.tick() => {
                    self.broadcast_heartbeat();
                }
            }
        }
    }

    fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { role, addr, reply } => {
                let session = self.register(role, addr);
                if reply.send(session).is_err() {
                    debug!("Registration requester went away");
                }
            }
            HubCommand::Deregister { id } => {
                if let Some(conn) = self.connections.remove(&id) {
                    info!(session = %id, role = %conn.info.role, "Connection removed");
                }
            }
            HubCommand::Publish { frame, scopes, exclude } => {
                self.fan_out(&frame, &scopes, exclude);
            }
            HubCommand::SendTo { id, frame } => {
                if self.connections.contains_key(&id) {
                    self.deliver(id, frame);
                } else {
                    debug!(session = %id, "Direct send to unknown session dropped");
                }
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(self.connections.len());
            }
            HubCommand::Snapshot { reply } => {
                let sessions = self.connections.values().map(|c| c.info.clone()).collect();
                let _ = reply.send(sessions);
            }
            HubCommand::Shutdown => {}
        }
    }

    fn register(&mut self, role: Role, addr: SocketAddr) -> Session {
        let (tx, outbound) = mpsc::channel(self.config.queue_capacity);
        let info = SessionInfo {
            id: Uuid::new_v4(),
            role,
            addr,
            connected_at: Utc::now(),
        };
        let id = info.id;

        self.connections.insert(
            id,
            Connection {
                info: info.clone(),
                tx,
            },
        );

        info!(
            session = %id,
            role = %role,
            addr = %addr,
            connections = self.connections.len(),
            "Connection registered"
        );

        let welcome = EventMessage::new(HubEvent::AuthResponse(AuthResponse {
            success: true,
            client_id: id.to_string(),
            role,
            message: None,
            server_time: Utc::now(),
        }));
        match welcome.encode() {
            Ok(text) => self.deliver(id, text.into()),
            Err(e) => error!(?e, "Failed to encode welcome"),
        }

        Session { info, outbound }
    }

    fn fan_out(&mut self, frame: &Frame, scopes: &[Scope], exclude: Option<Uuid>) {
        let targets: Vec<Uuid> = self
            .connections
            .values()
            .filter(|c| Some(c.info.id) != exclude)
            .filter(|c| scopes.iter().any(|scope| scope.matches(c.info.role)))
            .map(|c| c.info.id)
            .collect();

        for id in targets {
            self.deliver(id, frame.clone());
        }
    }

    /// Enqueues without waiting. A full or closed queue evicts the connection.
    fn deliver(&mut self, id: Uuid, frame: Frame) {
        let Some(conn) = self.connections.get(&id) else {
            return;
        };

        match conn.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    session = %id,
                    role = %conn.info.role,
                    capacity = self.config.queue_capacity,
                    "Outbound queue full, evicting connection"
                );
                self.connections.remove(&id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %id, "Outbound queue closed, removing connection");
                self.connections.remove(&id);
            }
        }
    }

    fn broadcast_heartbeat(&mut self) {
        if self.connections.is_empty() {
            return;
        }

        let beat = EventMessage::new(HubEvent::Heartbeat(Heartbeat {
            server_time: Some(Utc::now()),
            connections: Some(self.connections.len()),
        }));

        match beat.encode() {
            Ok(text) => {
                let frame: Frame = text.into();
                self.fan_out(&frame, &[Scope::All], None);
            }
            Err(e) => error!(?e, "Failed to encode heartbeat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavola_core::{EventKind, OrderEvent};

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn start_hub(capacity: usize) -> HubHandle {
        Hub::new(HubConfig {
            queue_capacity: capacity,
            heartbeat_interval: Duration::from_secs(3600),
        })
        .start()
    }

    fn order_update(order_id: i64) -> EventMessage {
        EventMessage::new(HubEvent::OrderUpdate(OrderEvent::new(order_id)))
    }

    async fn next_message(session: &mut Session) -> EventMessage {
        let frame = session.outbound.recv().await.expect("queue closed");
        EventMessage::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_connect_queues_welcome() {
        let hub = start_hub(8);
        let mut session = hub.connect(Role::Waiter, addr()).await.unwrap();

        let welcome = next_message(&mut session).await;
        match welcome.event {
            HubEvent::AuthResponse(auth) => {
                assert!(auth.success);
                assert_eq!(auth.role, Role::Waiter);
                assert_eq!(auth.client_id, session.info.id.to_string());
            }
            other => panic!("Expected AuthResponse, got {:?}", other),
        }
        assert_eq!(hub.connection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_scope_order_is_preserved() {
        let hub = start_hub(64);
        let mut kitchen = hub.connect(Role::Kitchen, addr()).await.unwrap();
        next_message(&mut kitchen).await;

        for id in 1..=20 {
            hub.publish(order_update(id), &[Scope::Role(Role::Kitchen)], None)
                .await
                .unwrap();
        }

        for expected in 1..=20 {
            match next_message(&mut kitchen).await.event {
                HubEvent::OrderUpdate(order) => assert_eq!(order.order_id, expected),
                other => panic!("Expected OrderUpdate, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_double_and_unknown_disconnect_are_noops() {
        let hub = start_hub(8);
        let session = hub.connect(Role::Register, addr()).await.unwrap();
        let other = hub.connect(Role::Kitchen, addr()).await.unwrap();

        hub.disconnect(session.info.id).await.unwrap();
        hub.disconnect(session.info.id).await.unwrap();
        hub.disconnect(Uuid::new_v4()).await.unwrap();

        let remaining = hub.snapshot().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, other.info.id);
    }

    #[tokio::test]
    async fn test_saturated_queue_evicts_only_that_connection() {
        let hub = start_hub(2);
        let mut slow = hub.connect(Role::Kitchen, addr()).await.unwrap();
        let mut fast = hub.connect(Role::Kitchen, addr()).await.unwrap();
        next_message(&mut fast).await;

        for id in 1..=3 {
            hub.publish(order_update(id), &[Scope::Role(Role::Kitchen)], None)
                .await
                .unwrap();
            // Keep the fast consumer drained.
            match next_message(&mut fast).await.event {
                HubEvent::OrderUpdate(order) => assert_eq!(order.order_id, id),
                other => panic!("Expected OrderUpdate, got {:?}", other),
            }
        }

        assert_eq!(hub.connection_count().await.unwrap(), 1);
        let survivors = hub.snapshot().await.unwrap();
        assert_eq!(survivors[0].id, fast.info.id);

        // The evicted queue keeps what it buffered, then closes.
        assert_eq!(next_message(&mut slow).await.kind(), EventKind::AuthResponse);
        assert_eq!(next_message(&mut slow).await.kind(), EventKind::OrderUpdate);
        assert!(slow.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_respects_scope_and_exclude() {
        let hub = start_hub(8);
        let mut register = hub.connect(Role::Register, addr()).await.unwrap();
        let mut kitchen = hub.connect(Role::Kitchen, addr()).await.unwrap();
        let mut waiter = hub.connect(Role::Waiter, addr()).await.unwrap();
        for s in [&mut register, &mut kitchen, &mut waiter] {
            next_message(s).await;
        }

        hub.publish(
            order_update(9),
            &[Scope::Role(Role::Kitchen), Scope::Role(Role::Register)],
            Some(register.info.id),
        )
        .await
        .unwrap();
        hub.connection_count().await.unwrap();

        assert_eq!(next_message(&mut kitchen).await.kind(), EventKind::OrderUpdate);
        assert!(register.outbound.try_recv().is_err());
        assert!(waiter.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_scopes_deliver_once() {
        let hub = start_hub(8);
        let mut waiter = hub.connect(Role::Waiter, addr()).await.unwrap();
        next_message(&mut waiter).await;

        hub.publish(order_update(1), &[Scope::All, Scope::Role(Role::Waiter)], None)
            .await
            .unwrap();
        hub.connection_count().await.unwrap();

        assert_eq!(next_message(&mut waiter).await.kind(), EventKind::OrderUpdate);
        assert!(waiter.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reaches_every_role() {
        let hub = Hub::new(HubConfig {
            queue_capacity: 8,
            heartbeat_interval: Duration::from_secs(30),
        })
        .start();
        let mut kitchen = hub.connect(Role::Kitchen, addr()).await.unwrap();
        let mut waiter = hub.connect(Role::Waiter, addr()).await.unwrap();
        next_message(&mut kitchen).await;
        next_message(&mut waiter).await;

        tokio::time::advance(Duration::from_secs(31)).await;

        match next_message(&mut kitchen).await.event {
            HubEvent::Heartbeat(beat) => assert_eq!(beat.connections, Some(2)),
            other => panic!("Expected Heartbeat, got {:?}", other),
        }
        assert_eq!(next_message(&mut waiter).await.kind(), EventKind::Heartbeat);
    }

    #[tokio::test]
    async fn test_zero_heartbeat_setting_still_accepts_connections() {
        let settings = crate::config::HubSettings {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        let hub = Hub::new(HubConfig::from(&settings)).start();

        let mut session = hub.connect(Role::Kitchen, addr()).await.unwrap();
        assert_eq!(next_message(&mut session).await.kind(), EventKind::AuthResponse);
        assert_eq!(hub.connection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let hub = start_hub(8);
        let mut session = hub.connect(Role::Register, addr()).await.unwrap();
        next_message(&mut session).await;

        hub.shutdown().await.unwrap();

        assert!(session.outbound.recv().await.is_none());
        assert!(matches!(
            hub.connect(Role::Waiter, addr()).await,
            Err(SyncError::ShuttingDown)
        ));
    }
}
