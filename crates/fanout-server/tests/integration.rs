//! End-to-end tests over real sockets: raw tungstenite publishers, the
//! `fanout-client` subscriber, and a server bound on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use fanout_client::{ClientConnection, ClientEvent, CloseReason, Subscription};
use fanout_core::Envelope;
use fanout_server::{ChannelState, FanoutServer, ServerConfig, SweepPolicy};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Publisher = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Seen = Arc<Mutex<Vec<ClientEvent>>>;

async fn start(config: ServerConfig) -> (FanoutServer, SocketAddr) {
    let server = FanoutServer::new(config);
    let (addr, _task) = server.listen().await.unwrap();
    (server, addr)
}

/// Poll `cond` every 10ms for up to 5s.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn publish(addr: SocketAddr, path: &str) -> Publisher {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

async fn send(publisher: &mut Publisher, envelope: &Envelope) {
    publisher
        .send(Message::Text(envelope.encode().unwrap().into()))
        .await
        .unwrap();
}

/// Connect, record every event, start, and wait until attached.
async fn subscribe(
    server: &FanoutServer,
    addr: SocketAddr,
    name: &str,
) -> (ClientConnection, Seen, Subscription) {
    let before = server.registry().get(name).map_or(0, |c| c.subscriber_count());
    let conn = ClientConnection::connect(&format!("ws://{addr}/subscribe/{name}"))
        .await
        .unwrap();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = conn.subscribe(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    conn.start().unwrap();

    let registry = Arc::clone(server.registry());
    let name = name.to_owned();
    wait_for("subscriber attach", || {
        registry.get(&name).is_some_and(|c| c.subscriber_count() > before)
    })
    .await;
    (conn, seen, sub)
}

fn payloads(seen: &Seen) -> Vec<(String, String)> {
    seen.lock()
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Payload { identifier, payload } => {
                Some((identifier.clone(), payload.clone()))
            }
            ClientEvent::Closed { .. } => None,
        })
        .collect()
}

fn close_reason(seen: &Seen) -> Option<CloseReason> {
    seen.lock().iter().find_map(|e| match e {
        ClientEvent::Closed { reason } => Some(*reason),
        ClientEvent::Payload { .. } => None,
    })
}

fn http_status(err: &tungstenite::Error) -> Option<u16> {
    match err {
        tungstenite::Error::Http(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

#[tokio::test]
async fn payload_reaches_every_subscriber() {
    let (server, addr) = start(ServerConfig::default()).await;
    let mut publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;

    let (_a, seen_a, _sa) = subscribe(&server, addr, "room1").await;
    let (_b, seen_b, _sb) = subscribe(&server, addr, "room1").await;

    send(&mut publisher, &Envelope::payload("C1", "{}")).await;

    wait_for("delivery", || payloads(&seen_a).len() == 1 && payloads(&seen_b).len() == 1).await;
    assert_eq!(payloads(&seen_a), vec![("C1".to_owned(), "{}".to_owned())]);
    assert_eq!(payloads(&seen_b), vec![("C1".to_owned(), "{}".to_owned())]);
}

#[tokio::test]
async fn envelopes_arrive_in_publish_order() {
    let (server, addr) = start(ServerConfig::default()).await;
    let mut publisher = publish(addr, "/publish?name=ordered").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("ordered")).await;
    let (_conn, seen, _sub) = subscribe(&server, addr, "ordered").await;

    for i in 0..20 {
        send(&mut publisher, &Envelope::payload(format!("C{i}"), "{}")).await;
    }

    wait_for("all deliveries", || payloads(&seen).len() == 20).await;
    let ids: Vec<String> = payloads(&seen).into_iter().map(|(id, _)| id).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("C{i}")).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (server, addr) = start(ServerConfig::default()).await;
    let mut publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;
    let (_conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    publisher.send(Message::Text("not json".into())).await.unwrap();
    send(&mut publisher, &Envelope::payload("C2", "x")).await;

    wait_for("valid delivery", || !payloads(&seen).is_empty()).await;
    assert_eq!(payloads(&seen), vec![("C2".to_owned(), "x".to_owned())]);
    assert_eq!(server.registry().get("room1").unwrap().state(), ChannelState::Connected);
}

#[tokio::test]
async fn generated_name_is_announced() {
    let (server, addr) = start(ServerConfig::default()).await;
    let mut publisher = publish(addr, "/publish").await;

    let frame = tokio::time::timeout(Duration::from_secs(5), publisher.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame");
    };
    let name = assert_matches!(
        Envelope::decode(text.as_str()).unwrap(),
        Envelope::ChannelAssigned { name } => name
    );
    assert!(server.registry().contains(&name));
}

#[tokio::test]
async fn reconnect_keeps_subscribers() {
    let (server, addr) = start(ServerConfig::default()).await;
    let registry = Arc::clone(server.registry());
    let mut first = publish(addr, "/publish?name=room1").await;
    wait_for("registration", || registry.contains("room1")).await;
    let (_conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    first.close(None).await.unwrap();
    wait_for("disconnect", || {
        registry.get("room1").is_some_and(|c| c.state() == ChannelState::Disconnected)
    })
    .await;

    let mut second = publish(addr, "/publish/room1").await;
    wait_for("reconnect", || {
        registry.get("room1").is_some_and(|c| c.state() == ChannelState::Connected)
    })
    .await;
    send(&mut second, &Envelope::payload("C1", "after")).await;

    wait_for("delivery after reconnect", || !payloads(&seen).is_empty()).await;
    assert_eq!(payloads(&seen), vec![("C1".to_owned(), "after".to_owned())]);
    assert_eq!(registry.get("room1").unwrap().subscriber_count(), 1);
    assert!(close_reason(&seen).is_none());
}

#[tokio::test]
async fn reconnect_supersedes_live_publisher() {
    let (server, addr) = start(ServerConfig::default()).await;
    let registry = Arc::clone(server.registry());
    let mut first = publish(addr, "/publish?name=room1").await;
    wait_for("registration", || registry.contains("room1")).await;

    let _second = publish(addr, "/publish/room1").await;

    // the superseded socket is closed by the relay
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "superseded publisher was not closed");
    assert_eq!(registry.get("room1").unwrap().state(), ChannelState::Connected);
}

#[tokio::test]
async fn unknown_channel_is_rejected_before_upgrade() {
    let (_server, addr) = start(ServerConfig::default()).await;

    let err = ClientConnection::connect(&format!("ws://{addr}/subscribe/missing"))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), Some(400));

    let err = connect_async(format!("ws://{addr}/publish/missing"))
        .await
        .unwrap_err();
    assert_eq!(http_status(&err), Some(400));
}

#[tokio::test]
async fn duplicate_name_is_conflict() {
    let (server, addr) = start(ServerConfig::default()).await;
    let _publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;

    let err = connect_async(format!("ws://{addr}/publish?name=room1"))
        .await
        .unwrap_err();
    assert_eq!(http_status(&err), Some(409));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn inactive_channel_is_evicted() {
    let (server, addr) = start(ServerConfig::default()).await;
    let mut publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;
    let (conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    let report = server
        .sweeper()
        .sweep_at(Instant::now() + Duration::from_secs(1000));
    assert_eq!(report.inactive, vec!["room1".to_owned()]);
    assert!(!registry.contains("room1"));

    tokio::time::timeout(Duration::from_secs(5), conn.finished())
        .await
        .unwrap();
    assert_eq!(close_reason(&seen), Some(CloseReason::ChannelDisconnected));

    // the publisher socket is closed too
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = publisher.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test]
async fn abandoned_channel_notifies_subscribers() {
    let config = ServerConfig {
        sweep: SweepPolicy {
            inactivity_timeout: Duration::from_secs(10_000),
            abandoned_timeout: Duration::from_secs(120),
            ..SweepPolicy::default()
        },
        ..ServerConfig::default()
    };
    let (server, addr) = start(config).await;
    let registry = Arc::clone(server.registry());
    let mut publisher = publish(addr, "/publish?name=room1").await;
    wait_for("registration", || registry.contains("room1")).await;
    let (conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    publisher.close(None).await.unwrap();
    wait_for("disconnect", || {
        registry.get("room1").is_some_and(|c| c.state() == ChannelState::Disconnected)
    })
    .await;

    let sweeper = server.sweeper();
    assert_eq!(sweeper.sweep_at(Instant::now()).evicted(), 0);

    let report = sweeper.sweep_at(Instant::now() + Duration::from_secs(200));
    assert_eq!(report.abandoned, vec!["room1".to_owned()]);
    assert!(!registry.contains("room1"));

    tokio::time::timeout(Duration::from_secs(5), conn.finished())
        .await
        .unwrap();
    assert_eq!(close_reason(&seen), Some(CloseReason::ChannelDisconnected));
}

#[tokio::test]
async fn subscriber_close_detaches_from_channel() {
    let (server, addr) = start(ServerConfig::default()).await;
    let _publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;
    let (conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    conn.close();
    tokio::time::timeout(Duration::from_secs(5), conn.finished())
        .await
        .unwrap();
    assert_eq!(close_reason(&seen), Some(CloseReason::ClosedByClient));

    wait_for("detach", || {
        registry.get("room1").is_some_and(|c| c.subscriber_count() == 0)
    })
    .await;
}

#[tokio::test]
async fn shutdown_closes_every_socket() {
    let (server, addr) = start(ServerConfig::default()).await;
    let _publisher = publish(addr, "/publish?name=room1").await;
    let registry = Arc::clone(server.registry());
    wait_for("registration", || registry.contains("room1")).await;
    let (conn, seen, _sub) = subscribe(&server, addr, "room1").await;

    server.shutdown().shutdown();

    tokio::time::timeout(Duration::from_secs(5), conn.finished())
        .await
        .unwrap();
    assert_eq!(close_reason(&seen), Some(CloseReason::TransportClosed));
}
