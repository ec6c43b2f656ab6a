mod common;

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use blocknet_p2p::{Envelope, NetworkError, PeerAddress, PeerState};

use common::*;

#[tokio::test]
async fn test_bind_failure_is_surfaced() {
    let (mut first, _) = start_node().await;
    let taken = first.bound_addr().unwrap();

    let mut config = test_config();
    config.listen_addr = taken;
    let recorder = std::sync::Arc::new(Recorder::default());
    let mut second = blocknet_p2p::P2pServer::new(config, recorder.clone(), recorder);

    match second.start().await {
        Err(NetworkError::Bind { addr, .. }) => assert_eq!(addr, taken),
        other => panic!("Expected Bind error, got {other:?}"),
    }
    assert!(!second.is_running());

    first.stop().await;
}

#[tokio::test]
async fn test_stop_with_silent_peers_finishes_within_grace() {
    let (mut node, _) = start_node().await;
    let bound = node.bound_addr().unwrap();

    // One peer that never speaks, one that registers and then goes quiet.
    let mut mute = TcpStream::connect(bound).await.unwrap();
    let mut quiet = TcpStream::connect(bound).await.unwrap();
    let quiet_addr = PeerAddress::new("127.0.0.1", 2);
    write_envelope(&mut quiet, &Envelope::registration(&quiet_addr)).await;
    wait_until("the quiet peer to register", || node.registry().contains(&quiet_addr)).await;

    let started = Instant::now();
    node.stop().await;
    let grace = node.config().shutdown_grace;
    assert!(
        started.elapsed() < grace + Duration::from_millis(500),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(node.registry().is_empty());

    // Both sockets are released by the node.
    let mut buf = [0u8; 64];
    for stream in [&mut mute, &mut quiet] {
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    // The listener is gone too.
    assert!(TcpStream::connect(bound).await.is_err());
}

#[tokio::test]
async fn test_silent_peer_dropped_after_idle_timeout() {
    let mut config = test_config();
    config.idle_timeout = Duration::from_millis(300);
    config.keepalive_interval = Duration::from_millis(100);
    let (mut node, _) = start_node_with(config).await;

    let mut silent = TcpStream::connect(node.bound_addr().unwrap()).await.unwrap();
    let silent_addr = PeerAddress::new("127.0.0.1", 3);
    write_envelope(&mut silent, &Envelope::registration(&silent_addr)).await;
    wait_until("the silent peer to register", || {
        node.registry()
            .get(&silent_addr)
            .is_some_and(|p| p.state == PeerState::Active)
    })
    .await;

    // It receives keep-alives but never answers.
    wait_until("the silent peer to be dropped", || {
        !node.registry().contains(&silent_addr)
    })
    .await;

    node.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (mut node, _) = start_node().await;
    node.stop().await;
    assert!(!node.is_running());

    node.start().await.unwrap();
    assert!(node.is_running());
    assert!(node.local_address().is_some());
    node.stop().await;
}
