//! End-to-end tests against a real hub listening on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tavola_core::{EventMessage, HubEvent, Role};
use tavola_sync::{
    hub_url, Hub, HubClient, HubClientConfig, HubConfig, HubHandle, HubServer, HubServerHandle,
    HubSettings,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn loopback_settings() -> HubSettings {
    HubSettings {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval_secs: 3600,
        ..HubSettings::default()
    }
}

async fn start_hub() -> (HubHandle, HubServerHandle) {
    start_hub_with(loopback_settings()).await
}

async fn start_hub_with(settings: HubSettings) -> (HubHandle, HubServerHandle) {
    let hub = Hub::new(HubConfig::from(&settings)).start();
    let server = HubServer::new(settings, hub.clone()).start().await.unwrap();
    (hub, server)
}

async fn connect(addr: SocketAddr, role: Role) -> (Socket, String) {
    let url = hub_url(addr, role).unwrap();
    let (mut socket, _) = connect_async(url.as_str()).await.unwrap();

    match next_event(&mut socket).await.event {
        HubEvent::AuthResponse(welcome) => {
            assert!(welcome.success);
            assert_eq!(welcome.role, role);
            (socket, welcome.client_id)
        }
        other => panic!("Expected auth_response, got {:?}", other),
    }
}

async fn next_event(socket: &mut Socket) -> EventMessage {
    loop {
        let frame = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return EventMessage::decode(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let waited = timeout(Duration::from_millis(300), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(_)) => continue,
                _ => return String::new(),
            }
        }
    })
    .await;
    assert!(waited.is_err(), "unexpected frame: {:?}", waited);
}

async fn wait_for_connections(hub: &HubHandle, expected: usize) {
    timeout(WAIT, async {
        while hub.connection_count().await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connections never registered");
}

async fn send(socket: &mut Socket, frame: &str) {
    socket.send(Message::Text(frame.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn kitchen_ack_reaches_registers_and_waiters() {
    let (hub, server) = start_hub().await;
    let addr = server.local_addr();

    let (mut kitchen, _) = connect(addr, Role::Kitchen).await;
    let (mut pos, _) = connect(addr, Role::Register).await;

    let (waiter, mut waiter_events) =
        HubClient::spawn(HubClientConfig::new(hub_url(addr, Role::Waiter).unwrap()));
    let welcome = timeout(WAIT, waiter_events.recv()).await.unwrap().unwrap();
    assert!(matches!(welcome.event, HubEvent::AuthResponse(_)));
    assert!(waiter.is_connected().await);

    wait_for_connections(&hub, 3).await;

    send(
        &mut kitchen,
        r#"{"type":"kitchen_ack","data":{"order_id":42,"order_number":"A-17"}}"#,
    )
    .await;

    match next_event(&mut pos).await.event {
        HubEvent::KitchenAckResult(result) => {
            assert_eq!(result.order_id, 42);
            assert_eq!(result.order_number, "A-17");
            assert!(result.acknowledged);
            assert!(result.acknowledged_at.is_some());
        }
        other => panic!("Expected kitchen_ack_result, got {:?}", other),
    }

    let at_waiter = timeout(WAIT, waiter_events.recv()).await.unwrap().unwrap();
    assert!(matches!(at_waiter.event, HubEvent::KitchenAckResult(ref r) if r.order_id == 42));

    assert_silent(&mut kitchen).await;
    assert_silent(&mut pos).await;

    waiter.shutdown().await.unwrap();
    drop(kitchen);
    drop(pos);
    hub.shutdown().await.unwrap();
    let _ = timeout(WAIT, server.shutdown()).await;
}

#[tokio::test]
async fn new_order_skips_its_origin() {
    let (hub, server) = start_hub().await;
    let addr = server.local_addr();

    let (mut kitchen, _) = connect(addr, Role::Kitchen).await;
    let (mut pos, pos_id) = connect(addr, Role::Register).await;
    let (mut waiter, _) = connect(addr, Role::Waiter).await;
    wait_for_connections(&hub, 3).await;

    send(
        &mut pos,
        r#"{"type":"order_new","data":{"order_id":7,"order_number":"A-7","table_id":4}}"#,
    )
    .await;

    let received = next_event(&mut kitchen).await;
    assert_eq!(received.client_id.as_deref(), Some(pos_id.as_str()));
    match received.event {
        HubEvent::OrderNew(order) => {
            assert_eq!(order.order_id, 7);
            assert_eq!(order.table_id, Some(4));
        }
        other => panic!("Expected order_new, got {:?}", other),
    }

    assert_silent(&mut pos).await;
    assert_silent(&mut waiter).await;

    drop((kitchen, pos, waiter));
    hub.shutdown().await.unwrap();
    let _ = timeout(WAIT, server.shutdown()).await;
}

#[tokio::test]
async fn malformed_frames_keep_the_connection_open() {
    let (hub, server) = start_hub().await;
    let (mut waiter, _) = connect(server.local_addr(), Role::Waiter).await;

    send(&mut waiter, "not json").await;
    send(&mut waiter, r#"{"type":"launch_rockets","data":{}}"#).await;
    send(&mut waiter, r#"{"type":"heartbeat"}"#).await;

    let reply = next_event(&mut waiter).await;
    assert!(matches!(reply.event, HubEvent::Heartbeat(_)));
    assert_eq!(hub.connection_count().await.unwrap(), 1);

    drop(waiter);
    hub.shutdown().await.unwrap();
    let _ = timeout(WAIT, server.shutdown()).await;
}

#[tokio::test]
async fn silent_socket_is_closed_after_idle_timeout() {
    let (hub, server) = start_hub_with(HubSettings {
        idle_timeout_secs: 1,
        ping_interval_secs: 3600,
        ..loopback_settings()
    })
    .await;
    let (mut kitchen, _) = connect(server.local_addr(), Role::Kitchen).await;
    wait_for_connections(&hub, 1).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    wait_for_connections(&hub, 0).await;

    let ended = timeout(WAIT, async {
        loop {
            match kitchen.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket still open after idle timeout");

    hub.shutdown().await.unwrap();
    let _ = timeout(WAIT, server.shutdown()).await;
}

#[tokio::test]
async fn server_pings_each_connection() {
    let (hub, server) = start_hub_with(HubSettings {
        ping_interval_secs: 1,
        ..loopback_settings()
    })
    .await;
    let (mut register, _) = connect(server.local_addr(), Role::Register).await;

    let pinged = timeout(WAIT, async {
        loop {
            match register.next().await {
                Some(Ok(Message::Ping(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await;
    assert!(matches!(pinged, Ok(true)), "no ping within {:?}", WAIT);
    assert_eq!(hub.connection_count().await.unwrap(), 1);

    drop(register);
    hub.shutdown().await.unwrap();
    let _ = timeout(WAIT, server.shutdown()).await;
}
