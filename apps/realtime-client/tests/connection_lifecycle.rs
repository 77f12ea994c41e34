//! Connection Lifecycle Integration Tests
//!
//! Drives `ConnectionClient` through the in-memory transport: handshake
//! timeouts, keepalive, remote and local closes, correlation and
//! subscription bookkeeping.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde_json::{Value, json};

use realtime_client::infrastructure::websocket::{
    Handshake, MemoryCapabilities, MemoryServer, MemoryTransport, Written,
};
use realtime_client::{
    ClientCallbacks, ClientConfig, ClientError, ConnectionClient, ConnectionStatus, Decompression,
    Frame, TransportEvent,
};

fn build(
    config: ClientConfig,
    callbacks: ClientCallbacks,
    capabilities: MemoryCapabilities,
) -> (ConnectionClient, MemoryServer) {
    let (transport, server) = MemoryTransport::with_capabilities(capabilities);
    let client = ConnectionClient::new(
        "memory://venue/ws",
        config,
        Arc::new(transport),
        callbacks,
    )
    .unwrap();
    (client, server)
}

fn default_client() -> (ConnectionClient, MemoryServer) {
    build(
        ClientConfig::default(),
        ClientCallbacks::new(),
        MemoryCapabilities::default(),
    )
}

async fn wait_for_status(client: &ConnectionClient, status: ConnectionStatus) {
    while client.status() != status {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_rejects_connected_handle() {
    let config = ClientConfig {
        connection_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let (client, server) = build(config, ClientCallbacks::new(), MemoryCapabilities::default());
    server.set_handshake(Handshake::Hang);

    let result = client.connect().await;

    match result {
        Err(ClientError::RequestTimeout(message)) => {
            assert!(message.contains("connection timeout"), "{message}");
            assert!(message.contains("memory://venue/ws"), "{message}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    wait_for_status(&client, ConnectionStatus::Closed).await;
}

#[tokio::test]
async fn rejected_handshake_surfaces_network_error() {
    let (client, server) = default_client();
    server.set_handshake(Handshake::Reject(ClientError::Network("refused".to_string())));

    let result = client.connect().await;

    assert_eq!(result, Err(ClientError::Network("refused".to_string())));
    wait_for_status(&client, ConnectionStatus::Closed).await;
    assert_eq!(client.error(), Some(ClientError::Network("refused".to_string())));
}

#[tokio::test]
async fn transport_receives_protocols_and_headers() {
    let config = ClientConfig {
        protocols: vec!["v2.json".to_string()],
        headers: vec![("x-api-key".to_string(), "secret".to_string())],
        ..ClientConfig::default()
    };
    let (client, mut server) = build(config, ClientCallbacks::new(), MemoryCapabilities::default());
    client.connect();
    let _peer = server.accept().await.unwrap();

    let (url, options) = server.opened().remove(0);
    assert_eq!(url, "memory://venue/ws");
    assert_eq!(options.protocols, ["v2.json"]);
    assert_eq!(options.headers[0].0, "x-api-key");
}

#[tokio::test(start_paused = true)]
async fn keepalive_timeout_rejects_pending_requests() {
    let config = ClientConfig {
        keep_alive: Some(Duration::from_secs(1)),
        max_ping_pong_misses: 2.0,
        ..ClientConfig::default()
    };
    let (client, mut server) = build(config, ClientCallbacks::new(), MemoryCapabilities::default());
    let connected = client.connect();
    let mut peer = server.accept().await.unwrap();
    connected.await.unwrap();

    let pending = client.request("order:1");

    assert_eq!(peer.next_written().await, Some(Written::Ping));
    match pending.await {
        Err(ClientError::RequestTimeout(message)) => {
            assert!(message.contains("ping-pong keepalive"), "{message}");
        }
        other => panic!("expected keepalive timeout, got {other:?}"),
    }
    wait_for_status(&client, ConnectionStatus::Closed).await;
}

#[tokio::test(start_paused = true)]
async fn pongs_keep_the_connection_alive() {
    let config = ClientConfig {
        keep_alive: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let (client, mut server) = build(config, ClientCallbacks::new(), MemoryCapabilities::default());
    client.connect();
    let mut peer = server.accept().await.unwrap();

    for _ in 0..5 {
        assert_eq!(peer.next_written().await, Some(Written::Ping));
        peer.push(TransportEvent::Pong(Vec::new()));
    }

    assert!(client.is_open());
}

#[tokio::test(start_paused = true)]
async fn platform_managed_pings_count_as_alive() {
    let config = ClientConfig {
        keep_alive: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let capabilities = MemoryCapabilities {
        control_frames: false,
        confirms_writes: true,
    };
    let (client, mut server) = build(config, ClientCallbacks::new(), capabilities);
    client.connect();
    let _peer = server.accept().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(client.is_open());
}

#[tokio::test(start_paused = true)]
async fn application_ping_messages_are_sent() {
    let config = ClientConfig {
        keep_alive: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let callbacks = ClientCallbacks::new().ping(|_| Some(json!({"op": "ping"})));
    let (client, mut server) = build(config, callbacks, MemoryCapabilities::default());
    client.connect();
    let mut peer = server.accept().await.unwrap();

    assert_eq!(
        peer.next_frame().await,
        Some(Frame::Text(r#"{"op":"ping"}"#.to_string()))
    );
    client.record_pong();
    assert!(client.is_open());
}

#[tokio::test]
async fn server_close_rejects_pending_with_close_code() {
    let (client, mut server) = default_client();
    let connected = client.connect();
    let peer = server.accept().await.unwrap();
    connected.await.unwrap();
    let disconnected = client.disconnected();
    let pending = client.request("ticker:BTC/USDT");

    peer.close(1001, "maintenance");

    assert_eq!(
        pending.await,
        Err(ClientError::Network(
            "connection closed by remote server, closing code 1001".to_string()
        ))
    );
    let close = disconnected.await.unwrap();
    assert_eq!(close.code, 1001);
    assert_eq!(close.reason, "maintenance");
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn user_close_rejects_pending_and_resolves_disconnected() {
    let closes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&closes);
    let callbacks = ClientCallbacks::new().on_close(move |_, close| seen.lock().push(close.code));
    let (client, mut server) = build(ClientConfig::default(), callbacks, MemoryCapabilities::default());
    let connected = client.connect();
    let mut peer = server.accept().await.unwrap();
    connected.await.unwrap();
    let pending = client.request("orders");

    let closed = client.close();
    assert!(client.close().ptr_eq(&closed));

    assert_eq!(closed.await.unwrap().code, 1000);
    assert_eq!(pending.await, Err(ClientError::ClosedByUser));
    assert_eq!(peer.next_written().await, Some(Written::Close(1000)));
    assert_eq!(*closes.lock(), [1000_u16]);
    assert!(client.send(&json!({})).await.is_err());
}

#[tokio::test]
async fn close_while_connecting_rejects_connected_handle() {
    let (client, server) = default_client();
    server.set_handshake(Handshake::Hang);

    let connected = client.connect();
    let closed = client.close();

    assert_eq!(connected.await, Err(ClientError::ClosedByUser));
    assert_eq!(closed.await.unwrap().code, 1000);
}

#[tokio::test]
async fn late_rejection_is_replayed() {
    let (client, _server) = default_client();

    assert!(!client.reject(ClientError::Exchange("insufficient funds".to_string()), Some("order:7")));

    assert_eq!(
        client.request("order:7").await,
        Err(ClientError::Exchange("insufficient funds".to_string()))
    );
    assert!(client.request("order:7").is_pending());
}

#[tokio::test]
async fn stashed_outcomes_do_not_survive_reconnect() {
    let (client, mut server) = default_client();
    let connected = client.connect();
    let peer = server.accept().await.unwrap();
    connected.await.unwrap();

    assert!(!client.resolve(json!({"old": true}), "books:BTC/USDT"));
    assert!(!client.reject(ClientError::Exchange("stale".to_string()), Some("order:1")));

    peer.close(1006, "");
    wait_for_status(&client, ConnectionStatus::Closed).await;

    let connected = client.connect();
    let _peer = server.accept().await.unwrap();
    connected.await.unwrap();

    assert!(client.request("books:BTC/USDT").is_pending());
    assert!(client.request("order:1").is_pending());
    assert_eq!(client.pending_requests(), 2);
}

#[tokio::test]
async fn watch_sends_subscribe_once_per_hash() {
    let (client, mut server) = default_client();
    let subscribe = json!({"op": "subscribe", "args": ["books"]});

    let first = client.watch("books:BTC/USDT", Some(subscribe.clone()), Some("books"));
    let second = client.watch("books:ETH/USDT", Some(subscribe), Some("books"));
    let mut peer = server.accept().await.unwrap();

    assert_eq!(
        peer.next_frame().await,
        Some(Frame::Text(r#"{"args":["books"],"op":"subscribe"}"#.to_string()))
    );
    assert_eq!(client.subscriptions(), ["books"]);

    client.resolve(json!({"bid": 1}), "books:BTC/USDT");
    client.resolve(json!({"bid": 2}), "books:ETH/USDT");
    assert_eq!(first.await.unwrap()["bid"], 1);
    assert_eq!(second.await.unwrap()["bid"], 2);

    client.close().await.unwrap();
    assert_eq!(peer.next_written().await, Some(Written::Close(1000)));
}

#[tokio::test]
async fn watch_without_subscribe_hash_reuses_waiter() {
    let (client, mut server) = default_client();

    let first = client.watch("trades:BTC/USDT", None, None);
    let second = client.watch("trades:BTC/USDT", None, None);
    let _peer = server.accept().await.unwrap();

    assert!(first.ptr_eq(&second));
}

#[tokio::test]
async fn failed_connection_forgets_subscription() {
    let (client, server) = default_client();
    server.set_handshake(Handshake::Reject(ClientError::Network("refused".to_string())));

    let watched = client.watch("books:BTC/USDT", Some(json!("sub")), Some("books"));

    assert_eq!(watched.await, Err(ClientError::Network("refused".to_string())));
    assert!(client.subscriptions().is_empty());
}

#[tokio::test]
async fn reconnect_resends_subscriptions() {
    let (client, mut server) = default_client();
    let _ = client.watch("books:BTC/USDT", Some(json!("sub")), Some("books"));
    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.next_frame().await, Some(Frame::Text("sub".to_string())));

    peer.close(1006, "");
    wait_for_status(&client, ConnectionStatus::Closed).await;
    assert!(client.subscriptions().is_empty());

    let _ = client.watch("books:BTC/USDT", Some(json!("sub")), Some("books"));
    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.next_frame().await, Some(Frame::Text("sub".to_string())));
}

#[tokio::test]
async fn gzip_frames_are_decoded() {
    let received = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&received);
    let config = ClientConfig {
        decompression: Decompression::Gzip,
        ..ClientConfig::default()
    };
    let callbacks = ClientCallbacks::new().on_message(move |_, value| sink.lock().push(value));
    let (client, mut server) = build(config, callbacks, MemoryCapabilities::default());
    client.connect();
    let peer = server.accept().await.unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(br#"{"id":123456789012345678,"ok":true}"#)
        .unwrap();
    peer.push(TransportEvent::Message(Frame::Binary(encoder.finish().unwrap())));

    while received.lock().is_empty() {
        tokio::task::yield_now().await;
    }
    let value = received.lock()[0].clone();
    assert_eq!(value["id"], "123456789012345678");
    assert_eq!(value["ok"], true);
}

#[tokio::test]
async fn transport_error_closes_connection() {
    let (client, mut server) = default_client();
    let connected = client.connect();
    let peer = server.accept().await.unwrap();
    connected.await.unwrap();
    let pending = client.request("x");

    peer.push(TransportEvent::Error(ClientError::Network("reset by peer".to_string())));

    assert_eq!(
        pending.await,
        Err(ClientError::Network("reset by peer".to_string()))
    );
    wait_for_status(&client, ConnectionStatus::Closed).await;
}
