#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end relay behavior over real TCP sockets on localhost.

use channel_relay::{ConnectionError, HandlerFailure, Packet, Peer, Relay};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn local_relay() -> Relay {
    Relay::bind("127.0.0.1:0").await.expect("relay should bind")
}

async fn connect(relay: &Relay) -> Peer {
    Peer::connect("127.0.0.1", relay.port())
        .await
        .expect("peer should connect")
}

/// Poll until `condition` holds or the test deadline passes.
async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn forward_channel(peer: &Peer, channel: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    peer.register_channel(channel, move |body| {
        let _ = tx.send(body.to_owned());
    });
    rx
}

#[tokio::test]
async fn test_message_reaches_other_peer_but_not_sender() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let mut a_chat = forward_channel(&a, "chat");
    let b = connect(&relay).await;
    let mut b_chat = forward_channel(&b, "chat");
    wait_until(|| relay.connection_count() == 2).await;

    b.send_message("chat", "hello").await.unwrap();

    let got = timeout(WAIT, a_chat.recv()).await.unwrap().unwrap();
    assert_eq!(got, "hello");
    assert!(timeout(Duration::from_millis(200), b_chat.recv()).await.is_err());
    assert!(a_chat.try_recv().is_err(), "handler must run exactly once");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_unregistered_channel_is_discarded_silently() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let b = connect(&relay).await;
    let mut b_chat = forward_channel(&b, "chat");
    let failures = Arc::new(Mutex::new(Vec::<HandlerFailure>::new()));
    let sink = failures.clone();
    b.on_handler_error(move |failure| sink.lock().unwrap().push(failure.clone()));
    wait_until(|| relay.connection_count() == 2).await;

    a.send_message("x", "nobody listens").await.unwrap();
    wait_until(|| relay.metrics().snapshot().frames_delivered == 1).await;

    // Follow-up on a registered channel proves the first frame was consumed and dropped
    a.send_message("chat", "after").await.unwrap();
    assert_eq!(timeout(WAIT, b_chat.recv()).await.unwrap().unwrap(), "after");
    assert!(failures.lock().unwrap().is_empty());
    assert!(!a.is_closed());
    assert!(!b.is_closed());

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_settle_on_full_count() {
    let relay = Arc::new(local_relay().await);
    let port = relay.port();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            let peer = Peer::connect("127.0.0.1", port).await.unwrap();
            // Once anything is registered nothing leaves, so every later read is in 1..=3
            wait_until(|| relay.connection_count() >= 1).await;
            for _ in 0..50 {
                let observed = relay.connection_count();
                assert!((1..=3).contains(&observed), "observed impossible count {observed}");
                tokio::task::yield_now().await;
            }
            peer
        }));
    }
    let mut peers = Vec::new();
    for task in tasks {
        peers.push(task.await.unwrap());
    }

    wait_until(|| relay.connection_count() == 3).await;
    let mut ids = relay.connection_ids();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_severed_peer_is_removed_once() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let b = connect(&relay).await;
    let c = connect(&relay).await;
    let mut c_chat = forward_channel(&c, "chat");
    wait_until(|| relay.connection_count() == 3).await;

    drop(b);
    wait_until(|| relay.connection_count() == 2).await;
    assert_eq!(relay.metrics().snapshot().connections_closed, 1);

    a.send_message("chat", "still here").await.unwrap();
    assert_eq!(timeout(WAIT, c_chat.recv()).await.unwrap().unwrap(), "still here");

    let snapshot = relay.metrics().snapshot();
    assert_eq!(snapshot.connections_closed, 1);
    assert_eq!(snapshot.delivery_failures, 0);
    assert_eq!(snapshot.frames_delivered, 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_truncated_frame_drops_only_that_connection() {
    let relay = local_relay().await;
    let healthy = connect(&relay).await;
    let mut raw = TcpStream::connect(relay.local_addr()).await.unwrap();
    wait_until(|| relay.connection_count() == 2).await;

    // Body length says 10, only 3 bytes follow
    raw.write_all(&[0, 0, 0, 0, 1, b'c', 0, 0, 0, 10, b'a', b'b', b'c'])
        .await
        .unwrap();
    raw.shutdown().await.unwrap();

    wait_until(|| relay.connection_count() == 1).await;
    wait_until(|| relay.metrics().snapshot().protocol_errors == 1).await;
    assert_eq!(relay.metrics().snapshot().connections_closed, 1);

    let mut buf = [0u8; 16];
    let read = timeout(WAIT, raw.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)), "relay should have closed the stream");
    assert!(!healthy.is_closed());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_unknown_packet_type_closes_connection() {
    let relay = local_relay().await;
    let mut raw = TcpStream::connect(relay.local_addr()).await.unwrap();
    wait_until(|| relay.connection_count() == 1).await;

    raw.write_all(&[0x7F, 0, 0, 0, 0]).await.unwrap();

    wait_until(|| relay.connection_count() == 0).await;
    assert_eq!(relay.metrics().snapshot().protocol_errors, 1);
    relay.shutdown().await;
}

#[tokio::test]
async fn test_relay_broadcast_and_unicast() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let mut a_news = forward_channel(&a, "news");
    wait_until(|| relay.connection_count() == 1).await;
    let a_id = relay.connection_ids()[0];

    let b = connect(&relay).await;
    let mut b_news = forward_channel(&b, "news");
    wait_until(|| relay.connection_count() == 2).await;

    assert_eq!(relay.broadcast(&Packet::message("news", "all")).await, 2);
    assert_eq!(timeout(WAIT, a_news.recv()).await.unwrap().unwrap(), "all");
    assert_eq!(timeout(WAIT, b_news.recv()).await.unwrap().unwrap(), "all");

    assert!(relay.unicast(a_id, &Packet::message("news", "only a")).await);
    assert_eq!(timeout(WAIT, a_news.recv()).await.unwrap().unwrap(), "only a");
    assert!(timeout(Duration::from_millis(200), b_news.recv()).await.is_err());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_does_not_stop_other_handlers() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let b = connect(&relay).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    b.register_channel("chat", |_| panic!("handler blew up"));
    let counter = ran.clone();
    b.register_channel("chat", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let failed = failures.clone();
    b.on_handler_error(move |failure| {
        assert_eq!(failure.index, 0);
        failed.fetch_add(1, Ordering::SeqCst);
    });
    wait_until(|| relay.connection_count() == 2).await;

    a.send_message("chat", "one").await.unwrap();
    a.send_message("chat", "two").await.unwrap();
    wait_until(|| ran.load(Ordering::SeqCst) == 2).await;
    assert_eq!(failures.load(Ordering::SeqCst), 2);
    assert!(!b.is_closed());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_peers() {
    let relay = local_relay().await;
    let a = connect(&relay).await;
    let b = connect(&relay).await;
    wait_until(|| relay.connection_count() == 2).await;

    relay.shutdown().await;
    assert_eq!(relay.connection_count(), 0);

    timeout(WAIT, a.closed()).await.unwrap();
    timeout(WAIT, b.closed()).await.unwrap();
    assert!(matches!(
        a.send_message("chat", "gone").await,
        Err(ConnectionError::NotConnected)
    ));

    // The listener is gone too
    assert!(matches!(
        Peer::connect("127.0.0.1", relay.port()).await,
        Err(ConnectionError::Refused { .. })
    ));
}
