//! # Hub Client
//!
//! WebSocket client a handheld or kitchen display uses to stay attached to
//! the hub, with automatic reconnection and backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Hub Client Connection States                         │
//! │                                                                         │
//! │  ┌────────────┐    spawn()      ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │ Connecting │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           ▼                           │
//! │        │              ┌────────────┐  ┌────────────┐                   │
//! │        │              │ Connected  │  │ Backoff    │                   │
//! │        │              └─────┬──────┘  └─────┬──────┘                   │
//! │        │                    │               │                           │
//! │        │              close/error           │  timer expired            │
//! │        │                    ▼               │                           │
//! │        │              ┌────────────┐        │                           │
//! │        └───────────── │Reconnecting│ ◄──────┘                          │
//! │                       └────────────┘                                    │
//! │                                                                         │
//! │  URL: ws://<hub>/ws?type=<pos|kitchen|waiter>                          │
//! │  Every session gets a fresh auth_response with a new client_id.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use tavola_core::{EventMessage, HubEvent, Role};

use crate::config::ClientSettings;
use crate::error::{SyncError, SyncResult};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connection State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before the next attempt.
    Backoff,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

// =============================================================================
// Hub URL
// =============================================================================

/// Builds the socket URL for a discovered hub address.
pub fn hub_url(addr: SocketAddr, role: Role) -> SyncResult<Url> {
    with_role(&format!("ws://{}/ws", addr), role)
}

/// Adds `?type=<role>` to a configured hub URL, defaulting the path to `/ws`.
pub fn with_role(base: &str, role: Role) -> SyncResult<Url> {
    let mut url = Url::parse(base)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SyncError::InvalidUrl(format!(
            "Hub URL must be ws(s), got: {}",
            base
        )));
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }

    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "type")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &others {
            query.append_pair(k, v);
        }
        query.append_pair("type", role.as_str());
    }

    Ok(url)
}

// =============================================================================
// Client Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct HubClientConfig {
    pub url: Url,
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_retries: u32,
    /// Keepalive ping period. Must stay under the hub's idle timeout.
    pub ping_interval: Duration,
}

impl HubClientConfig {
    pub fn new(url: Url) -> Self {
        HubClientConfig {
            url,
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: 0,
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn with_settings(mut self, settings: &ClientSettings) -> Self {
        self.initial_backoff = Duration::from_millis(settings.initial_backoff_ms);
        self.max_backoff = Duration::from_secs(settings.max_backoff_secs);
        self.max_retries = settings.max_retries;
        self
    }
}

// =============================================================================
// Client Handle
// =============================================================================

/// Handle for sending events and observing the connection.
#[derive(Clone)]
pub struct HubClientHandle {
    outgoing_tx: mpsc::Sender<EventMessage>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl HubClientHandle {
    /// Queues an event for the hub. Held until the next connected session.
    pub async fn send(&self, event: HubEvent) -> SyncResult<()> {
        self.outgoing_tx
            .send(EventMessage::new(event))
            .await
            .map_err(|_| SyncError::ChannelError("Client outgoing channel closed".into()))
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Closes the connection and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Client shutdown channel closed".into()))
    }
}

// =============================================================================
// Hub Client
// =============================================================================

/// Reconnecting hub client.
///
/// ## Usage
/// ```rust,ignore
/// let addr = discovery.discover_or_err().await?;
/// let config = HubClientConfig::new(hub_url(addr, Role::Waiter)?);
/// let (handle, mut events) = HubClient::spawn(config);
///
/// while let Some(msg) = events.recv().await {
///     println!("{}", msg.kind());
/// }
/// ```
pub struct HubClient {
    config: HubClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<EventMessage>,
    incoming_tx: mpsc::Sender<EventMessage>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl HubClient {
    /// Spawns the client task. Returns a handle and the stream of events the
    /// hub delivers, `auth_response` included.
    pub fn spawn(config: HubClientConfig) -> (HubClientHandle, mpsc::Receiver<EventMessage>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(100);
        let (incoming_tx, incoming_rx) = mpsc::channel(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let client = HubClient {
            config,
            state: state.clone(),
            outgoing_rx,
            incoming_tx,
            shutdown_rx,
        };

        tokio::spawn(client.run());

        let handle = HubClientHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, incoming_rx)
    }

    async fn run(mut self) {
        info!(url = %self.config.url, "Hub client starting");

        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;

            match self.connect_with_timeout().await {
                Ok(stream) => {
                    info!("Connected to hub");
                    self.set_state(ConnectionState::Connected).await;
                    backoff.reset();
                    retry_count = 0;

                    match self.connection_loop(stream).await {
                        Ok(true) => break,
                        Ok(false) => info!("Hub closed the connection"),
                        Err(e) => warn!(?e, "Hub connection lost"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to hub");
                }
            }

            self.set_state(ConnectionState::Backoff).await;

            if self.config.max_retries > 0 {
                retry_count += 1;
                if retry_count >= self.config.max_retries {
                    error!(
                        max_retries = self.config.max_retries,
                        "Max reconnection attempts reached"
                    );
                    break;
                }
            }

            let Some(duration) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                break;
            };
            debug!(?duration, attempt = retry_count, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    self.set_state(ConnectionState::Reconnecting).await;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("Hub client stopped");
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    async fn connect_with_timeout(&self) -> SyncResult<HubStream> {
        match timeout(self.config.connect_timeout, connect_async(self.config.url.as_str())).await {
            Ok(Ok((stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Pumps one session. `Ok(true)` means shutdown was requested.
    async fn connection_loop(&mut self, stream: HubStream) -> SyncResult<bool> {
        let (mut write, mut read) = stream.split();

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                Some(msg) = self.outgoing_rx.recv() => {
                    let json = msg.encode()?;
                    debug!(kind = %msg.kind(), "Sending event");
                    write.send(WsMessage::Text(json.into())).await?;
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => match EventMessage::decode(text.as_str()) {
                            Ok(msg) => {
                                debug!(kind = %msg.kind(), "Received event");
                                if self.incoming_tx.send(msg).await.is_err() {
                                    return Err(SyncError::ChannelError("Event receiver dropped".into()));
                                }
                            }
                            Err(e) => warn!(error = %e, "Dropping undecodable hub frame"),
                        },
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            debug!(?frame, "Received close frame");
                            return Ok(false);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(SyncError::from(e)),
                        None => return Ok(false),
                    }
                }

                _ = ping.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Closing hub connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(true);
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
