use crate::harness::{EVENT_TIMEOUT, RelayTestServer, relay_config};
use checkin_relay::core::{CheckIn, ClientEvent, ConnectionState, StaticIdentity};
use checkin_relay::transport::{
    ConnectionHandle, ConnectionOptions, ServerMessage, spawn_connection,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

fn spawn_for(config: &checkin_relay::Config) -> (ConnectionHandle, mpsc::Receiver<ClientEvent>) {
    spawn_as(config, None)
}

fn spawn_as(
    config: &checkin_relay::Config,
    token: Option<&str>,
) -> (ConnectionHandle, mpsc::Receiver<ClientEvent>) {
    let options = ConnectionOptions::from_config(config).expect("relay url should be valid");
    let (events_tx, events_rx) = mpsc::channel(64);
    let identity = Arc::new(StaticIdentity::new("tester", None, token.map(String::from)));
    let (handle, _driver) = spawn_connection(options, identity, events_tx);
    (handle, events_rx)
}

/// Everything the driver emits within `window`.
async fn collect_for(events: &mut mpsc::Receiver<ClientEvent>, window: Duration) -> Vec<ClientEvent> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

fn count_state(events: &[ClientEvent], target: ConnectionState) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ClientEvent::ConnectionChanged { state, .. } if *state == target))
        .count()
}

async fn next_state(events: &mut mpsc::Receiver<ClientEvent>) -> (ConnectionState, Option<String>) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if let Some(ClientEvent::ConnectionChanged { state, detail }) = events.recv().await {
                return (state, detail);
            }
        }
    })
    .await
    .expect("connection event should arrive")
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn unreachable_relay_reports_disconnected_with_detail() {
    let port = closed_port().await;
    let mut config = checkin_relay::Config {
        relay_url: format!("ws://127.0.0.1:{port}/ws"),
        ..checkin_relay::Config::default()
    };
    config.client.auto_reconnect = false;
    let (handle, mut events) = spawn_for(&config);

    handle.connect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Connecting);
    let (state, detail) = next_state(&mut events).await;
    assert_eq!(state, ConnectionState::Disconnected);
    assert!(detail.is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_relay_is_retried_with_backoff() {
    let port = closed_port().await;
    let mut config = checkin_relay::Config {
        relay_url: format!("ws://127.0.0.1:{port}/ws"),
        ..checkin_relay::Config::default()
    };
    config.client.backoff_base_ms = 20;
    config.client.backoff_max_ms = 40;
    let (handle, mut events) = spawn_for(&config);

    handle.connect().await.unwrap();
    let mut attempts = 0;
    while attempts < 3 {
        if next_state(&mut events).await.0 == ConnectionState::Connecting {
            attempts += 1;
        }
    }

    handle.disconnect().await.unwrap();
    handle.shutdown().await;
}

#[tokio::test]
async fn open_connection_completes_history() {
    let server = RelayTestServer::open().await;
    let (handle, mut events) = spawn_for(&server.client_config("tester"));

    handle.connect().await.unwrap();
    handle
        .wait_for(ConnectionState::Open)
        .await
        .expect("driver should reach open");

    let ready = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if let Some(ClientEvent::HistoryReady { received }) = events.recv().await {
                return received;
            }
        }
    })
    .await
    .expect("history should complete");
    assert_eq!(ready, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn connect_while_open_reasserts_state() {
    let server = RelayTestServer::open().await;
    let (handle, mut events) = spawn_for(&server.client_config("tester"));

    handle.connect().await.unwrap();
    handle.wait_for(ConnectionState::Open).await.unwrap();
    while next_state(&mut events).await.0 != ConnectionState::Open {}

    handle.connect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Open);
    assert_eq!(handle.state(), ConnectionState::Open);

    handle.shutdown().await;
}

#[tokio::test]
async fn disconnect_always_reports_disconnected() {
    let server = RelayTestServer::open().await;
    let (handle, mut events) = spawn_for(&server.client_config("tester"));

    handle.connect().await.unwrap();
    handle.wait_for(ConnectionState::Open).await.unwrap();
    while next_state(&mut events).await.0 != ConnectionState::Open {}

    handle.disconnect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Closing);
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Disconnected);

    // Already disconnected: still announced.
    handle.disconnect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Disconnected);

    // No reconnect is scheduled after an explicit disconnect.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_tears_down_and_opens_again() {
    let server = RelayTestServer::open().await;
    let (handle, mut events) = spawn_for(&server.client_config("tester"));

    handle.connect().await.unwrap();
    handle.wait_for(ConnectionState::Open).await.unwrap();
    while next_state(&mut events).await.0 != ConnectionState::Open {}

    handle.reconnect().await.unwrap();
    let mut seen = Vec::new();
    while seen.last() != Some(&ConnectionState::Open) {
        seen.push(next_state(&mut events).await.0);
    }
    assert!(seen.contains(&ConnectionState::Disconnected));
    assert!(seen.contains(&ConnectionState::Connecting));

    handle.shutdown().await;
}

#[tokio::test]
async fn send_while_disconnected_fails() {
    let server = RelayTestServer::open().await;
    let (handle, _events) = spawn_for(&server.client_config("tester"));

    let result = handle
        .send(checkin_relay::transport::ClientMessage::HistoryRequest)
        .await;
    assert!(matches!(
        result,
        Err(checkin_relay::error::TransportError::NotConnected)
    ));

    handle.shutdown().await;
}

#[tokio::test]
async fn rejected_handshake_token_suspends_reconnect() {
    let mut relay = relay_config();
    relay.relay.require_token = true;
    relay.relay.tokens = vec!["team-token".into()];
    let server = RelayTestServer::start(relay).await;

    let mut config = server.client_config("tester");
    config.client.backoff_base_ms = 20;
    config.client.backoff_max_ms = 40;
    let (handle, mut events) = spawn_as(&config, Some("wrong-token"));

    handle.connect().await.unwrap();
    let seen = collect_for(&mut events, Duration::from_millis(600)).await;

    assert_eq!(count_state(&seen, ConnectionState::Connecting), 1);
    let reason = seen
        .iter()
        .find_map(|e| match e {
            ClientEvent::AuthenticationFailed { reason } => Some(reason.clone()),
            _ => None,
        })
        .expect("handshake rejection should surface as an auth failure");
    assert!(reason.contains("401"));
    assert!(matches!(
        seen.last(),
        Some(ClientEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
            detail: Some(_),
        })
    ));
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    handle.shutdown().await;
}

#[tokio::test]
async fn explicit_connect_retries_after_auth_rejection() {
    let mut relay = relay_config();
    relay.relay.require_token = true;
    relay.relay.tokens = vec!["team-token".into()];
    let server = RelayTestServer::start(relay).await;

    let (handle, mut events) = spawn_as(&server.client_config("tester"), Some("wrong-token"));
    handle.connect().await.unwrap();
    collect_for(&mut events, Duration::from_millis(300)).await;

    handle.connect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Connecting);

    handle.shutdown().await;
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    // Accepts TCP connections but never answers the upgrade request.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let stall = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = checkin_relay::Config {
        relay_url: format!("ws://127.0.0.1:{port}/ws"),
        ..checkin_relay::Config::default()
    };
    config.client.connect_timeout_ms = 200;
    config.client.auto_reconnect = false;
    let (handle, mut events) = spawn_for(&config);

    let started = Instant::now();
    handle.connect().await.unwrap();
    assert_eq!(next_state(&mut events).await.0, ConnectionState::Connecting);
    let (state, detail) = next_state(&mut events).await;
    assert_eq!(state, ConnectionState::Disconnected);
    assert!(started.elapsed() >= Duration::from_millis(200));
    let detail = detail.expect("timeout should carry a detail");
    assert!(detail.contains("timed out after 200ms"), "{detail}");

    handle.shutdown().await;
    stall.abort();
}

#[tokio::test]
async fn second_reconnect_supersedes_the_first() {
    let server = RelayTestServer::open().await;
    let mut config = server.client_config("tester");
    config.client.reconnect_settle_ms = 300;
    let (handle, mut events) = spawn_for(&config);

    handle.connect().await.unwrap();
    while next_state(&mut events).await.0 != ConnectionState::Open {}

    handle.reconnect().await.unwrap();
    handle.reconnect().await.unwrap();
    let seen = collect_for(&mut events, Duration::from_millis(800)).await;

    assert_eq!(count_state(&seen, ConnectionState::Connecting), 1);
    assert_eq!(handle.state(), ConnectionState::Open);

    handle.shutdown().await;
}

#[tokio::test]
async fn disconnect_abandons_pending_reconnect() {
    let server = RelayTestServer::open().await;
    let mut config = server.client_config("tester");
    config.client.reconnect_settle_ms = 200;
    let (handle, mut events) = spawn_for(&config);

    handle.connect().await.unwrap();
    while next_state(&mut events).await.0 != ConnectionState::Open {}

    handle.reconnect().await.unwrap();
    handle.disconnect().await.unwrap();
    let seen = collect_for(&mut events, Duration::from_millis(600)).await;

    assert_eq!(count_state(&seen, ConnectionState::Connecting), 0);
    assert_eq!(handle.state(), ConnectionState::Disconnected);

    handle.shutdown().await;
}

#[tokio::test]
async fn history_completes_after_idle_window_without_end_marker() {
    // A relay that replays two check-ins and then goes quiet.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let quiet_relay = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        for identity in ["alice", "bob"] {
            let frame = ServerMessage::NewCheckin(CheckIn::compose(
                identity,
                vec!["rust".into()],
                "reviewing",
                42,
            ));
            ws.send(Message::Text(frame.to_json().into())).await.unwrap();
        }
        while ws.next().await.is_some() {}
    });

    let mut config = checkin_relay::Config {
        relay_url: format!("ws://127.0.0.1:{port}/ws"),
        ..checkin_relay::Config::default()
    };
    config.client.auto_reconnect = false;
    config.client.history_idle_ms = 200;
    config.client.history_ceiling_ms = 3_000;
    let (handle, mut events) = spawn_for(&config);

    let started = Instant::now();
    handle.connect().await.unwrap();

    let mut check_ins = 0;
    let mut last_check_in = None;
    let received = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await.expect("driver should keep emitting") {
                ClientEvent::CheckInReceived { .. } => {
                    check_ins += 1;
                    last_check_in = Some(Instant::now());
                }
                ClientEvent::HistoryReady { received } => return received,
                _ => {}
            }
        }
    })
    .await
    .expect("history should complete without an end marker");

    assert_eq!(received, 2);
    assert_eq!(check_ins, 2);
    let quiet_for = last_check_in.expect("check-ins arrive first").elapsed();
    assert!(quiet_for >= Duration::from_millis(100), "fired after {quiet_for:?}");
    assert!(started.elapsed() < Duration::from_millis(3_000));

    handle.shutdown().await;
    quiet_relay.abort();
}
