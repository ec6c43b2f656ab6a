mod common;

use std::time::Duration;

use blocknet_p2p::{Direction, PairOutcome, PeerState};

use common::*;

#[tokio::test]
async fn test_pair_registers_both_sides() {
    let (mut a, _) = start_node().await;
    let (mut b, _) = start_node().await;
    let addr_a = address_of(&a);
    let addr_b = address_of(&b);

    assert_eq!(a.pair(addr_b.clone()).await.unwrap(), PairOutcome::Paired);
    wait_until("B to register A", || b.registry().contains(&addr_a)).await;

    let b_in_a = a.registry().get(&addr_b).unwrap();
    assert_eq!(b_in_a.state, PeerState::Active);
    assert_eq!(b_in_a.direction, Direction::Outbound);

    let a_in_b = b.registry().get(&addr_a).unwrap();
    assert_eq!(a_in_b.state, PeerState::Active);
    assert_eq!(a_in_b.direction, Direction::Inbound);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_repeated_pairing_is_idempotent() {
    let (mut a, _) = start_node().await;
    let (mut b, _) = start_node().await;
    let addr_b = address_of(&b);

    assert_eq!(a.pair(addr_b.clone()).await.unwrap(), PairOutcome::Paired);
    for _ in 0..3 {
        assert_eq!(
            a.pair(addr_b.clone()).await.unwrap(),
            PairOutcome::AlreadyRegistered
        );
    }
    assert_eq!(a.registry().len(), 1);

    let addr_a = address_of(&a);
    wait_until("B to register A", || b.registry().contains(&addr_a)).await;
    // B pairing back reuses the entry created by A's registration.
    assert_eq!(
        b.pair(addr_a.clone()).await.unwrap(),
        PairOutcome::AlreadyRegistered
    );
    assert_eq!(b.registry().len(), 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_simultaneous_pairing_converges() {
    let (mut a, _) = start_node().await;
    let (mut b, _) = start_node().await;
    let addr_a = address_of(&a);
    let addr_b = address_of(&b);

    let (from_a, from_b) = tokio::join!(a.pair(addr_b.clone()), b.pair(addr_a.clone()));
    from_a.unwrap();
    from_b.unwrap();

    let converged = || {
        match (a.registry().get(&addr_b), b.registry().get(&addr_a)) {
            (Some(b_in_a), Some(a_in_b)) => {
                a.registry().len() == 1
                    && b.registry().len() == 1
                    && b_in_a.state == PeerState::Active
                    && a_in_b.state == PeerState::Active
                    // One socket: dialled by one side, accepted by the other.
                    && b_in_a.direction != a_in_b.direction
            }
            _ => false,
        }
    };
    wait_until("both registries to settle on one connection", converged).await;

    // The losing connections are gone and nothing flaps afterwards.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(converged());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_known_peers_are_paired_on_start() {
    let (mut seed, _) = start_node().await;
    let seed_addr = address_of(&seed);

    let mut config = test_config();
    config.known_peers = vec![seed_addr.clone()];
    let (mut joiner, _) = start_node_with(config).await;
    let joiner_addr = address_of(&joiner);

    wait_until("joiner to pair with the seed", || {
        joiner.registry().contains(&seed_addr) && seed.registry().contains(&joiner_addr)
    })
    .await;

    joiner.stop().await;
    seed.stop().await;
}

#[tokio::test]
async fn test_keepalive_holds_quiet_peers_open() {
    let mut config = test_config();
    config.idle_timeout = Duration::from_millis(600);
    config.keepalive_interval = Duration::from_millis(100);
    let (mut a, _) = start_node_with(config.clone()).await;
    let (mut b, _) = start_node_with(config).await;
    let addr_a = address_of(&a);
    let addr_b = address_of(&b);

    a.pair(addr_b.clone()).await.unwrap();
    wait_until("B to register A", || b.registry().contains(&addr_a)).await;

    // Several idle timeouts pass with no application traffic.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(a.registry().contains(&addr_b));
    assert!(b.registry().contains(&addr_a));

    a.stop().await;
    b.stop().await;
}
