//! # Hub Server
//!
//! The axum front of the realtime hub: WebSocket upgrade at `/ws`, liveness
//! at `/health`, and the per-socket reader and writer tasks.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  GET /ws?type=kitchen                                                  │
//! │     │                                                                   │
//! │     ├── unknown type ─────────────▶ 400 Bad Request (never upgraded)    │
//! │     ▼                                                                   │
//! │  upgrade → hub.connect(role, addr) → Session { id, outbound }           │
//! │     │                                                                   │
//! │     ├──▶ writer task: outbound queue → socket, ping every 54 s         │
//! │     │                                                                   │
//! │     └──▶ reader task: socket → decode once → hub.handle_inbound        │
//! │                       no frame for 60 s → close                         │
//! │                                                                         │
//! │  first task to finish ends the connection → hub.disconnect(id)          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use tavola_core::{EventMessage, Role, HUB_SERVICE_NAME};

use crate::config::HubSettings;
use crate::error::{SyncError, SyncResult};
use crate::hub::{Frame, HubHandle, Session, SessionInfo};

// =============================================================================
// Server State
// =============================================================================

#[derive(Clone)]
struct ServerState {
    hub: HubHandle,
    settings: Arc<HubSettings>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "type")]
    kind: Option<String>,
}

// =============================================================================
// Hub Server
// =============================================================================

/// HTTP + WebSocket listener in front of a running [`HubHandle`].
pub struct HubServer {
    settings: HubSettings,
    hub: HubHandle,
}

/// Handle for a started server.
pub struct HubServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl HubServerHandle {
    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the listener to exit.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Server shutdown channel closed".into()))?;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("Server task failed: {}", e)))
    }
}

impl HubServer {
    pub fn new(settings: HubSettings, hub: HubHandle) -> Self {
        HubServer { settings, hub }
    }

    /// Binds the listener and spawns the server.
    pub async fn start(self) -> SyncResult<HubServerHandle> {
        let bind_addr = self.settings.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::BindFailed {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| SyncError::BindFailed {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let state = ServerState {
            hub: self.hub,
            settings: Arc::new(self.settings),
        };

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Hub server shutting down");
            })
            .await;

            if let Err(e) = served {
                warn!(?e, "Hub server exited with error");
            }
        });

        info!(addr = %local_addr, "Hub server listening");

        Ok(HubServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<ServerState>) -> Response {
    match state.hub.connection_count().await {
        Ok(connections) => Json(json!({
            "status": "ok",
            "service": HUB_SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "connections": connections,
        }))
        .into_response(),
        Err(e) => {
            warn!(?e, "Health check could not reach hub loop");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "service": HUB_SERVICE_NAME })),
            )
                .into_response()
        }
    }
}

async fn ws_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let role = match params.kind.as_deref() {
        None | Some("") => Role::default(),
        Some(raw) => match raw.parse::<Role>() {
            Ok(role) => role,
            Err(e) => {
                warn!(addr = %addr, kind = %raw, "Rejecting connection with unknown type");
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
        },
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(addr = %addr, %rejection, "Not a WebSocket upgrade");
            return rejection.into_response();
        }
    };

    debug!(addr = %addr, role = %role, "WebSocket upgrade requested");
    let max_message_size = state.settings.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, role, addr))
}

// =============================================================================
// Socket Tasks
// =============================================================================

async fn handle_socket(socket: WebSocket, state: ServerState, role: Role, addr: SocketAddr) {
    let Session { info, outbound } = match state.hub.connect(role, addr).await {
        Ok(session) => session,
        Err(e) => {
            warn!(addr = %addr, ?e, "Hub refused connection");
            return;
        }
    };
    let session_id = info.id;

    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        state.settings.ping_interval(),
        session_id,
    ));
    let mut reader = tokio::spawn(read_loop(
        stream,
        state.hub.clone(),
        info,
        state.settings.idle_timeout(),
    ));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Err(e) = state.hub.disconnect(session_id).await {
        debug!(session = %session_id, ?e, "Disconnect after hub shutdown");
    }
    info!(session = %session_id, "Connection closed");
}

/// Drains the session's outbound queue onto the socket and keeps it pinged.
/// Ends when the hub drops the queue (eviction, shutdown) or a write fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    ping_every: Duration,
    session_id: uuid::Uuid,
) {
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                            debug!(session = %session_id, ?e, "Write failed");
                            break;
                        }
                    }
                    None => {
                        debug!(session = %session_id, "Outbound queue closed by hub");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Reads frames until close, error, or the idle timeout.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: HubHandle,
    info: SessionInfo,
    idle_timeout: Duration,
) {
    loop {
        let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(session = %info.id, secs = idle_timeout.as_secs(), "Idle timeout");
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => dispatch(&hub, &info, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch(&hub, &info, text).await,
                Err(_) => debug!(session = %info.id, "Non-UTF-8 binary frame dropped"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                debug!(session = %info.id, "Client requested close");
                break;
            }
            Some(Err(e)) => {
                warn!(session = %info.id, ?e, "WebSocket error");
                break;
            }
            None => break,
        }
    }
}

/// Decodes one frame and hands it to the router. Bad frames never close the
/// connection.
async fn dispatch(hub: &HubHandle, info: &SessionInfo, text: &str) {
    match EventMessage::decode(text) {
        Ok(message) => {
            let kind = message.kind();
            if let Err(e) = hub.handle_inbound(info, message).await {
                warn!(session = %info.id, kind = %kind, ?e, "Failed to route event");
            }
        }
        Err(e) if e.is_unknown_kind() => {
            warn!(session = %info.id, error = %e, "Unknown event type dropped");
        }
        Err(e) => {
            warn!(session = %info.id, error = %e, "Malformed frame dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};

    fn local_settings() -> HubSettings {
        HubSettings {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            ..HubSettings::default()
        }
    }

    #[tokio::test]
    async fn test_health_reports_connections() {
        let settings = local_settings();
        let hub = Hub::new(HubConfig::from(&settings)).start();
        let _session = hub
            .connect(Role::Waiter, "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap();

        let server = HubServer::new(settings, hub).start().await.unwrap();
        let url = format!("http://{}/health", server.local_addr());

        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "tavola-hub");
        assert_eq!(body["connections"], 1);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_role_rejected_before_upgrade() {
        let settings = local_settings();
        let hub = Hub::new(HubConfig::from(&settings)).start();
        let server = HubServer::new(settings, hub.clone()).start().await.unwrap();

        let url = format!("http://{}/ws?type=chef", server.local_addr());
        let response = reqwest::get(&url).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(hub.connection_count().await.unwrap(), 0);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let settings = HubSettings {
            bind_addr: "127.0.0.1".to_string(),
            port,
            ..HubSettings::default()
        };
        let hub = Hub::new(HubConfig::from(&settings)).start();
        let err = HubServer::new(settings, hub).start().await.err().unwrap();
        assert!(matches!(err, SyncError::BindFailed { .. }));
    }
}
