#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use blocknet_p2p::{Admission, ChainService, Envelope, NetworkConfig, P2pServer, PeerAddress, PoolService};

/// Chain and pool collaborator that records every payload it is handed.
#[derive(Default)]
pub struct Recorder {
    pub chains: Mutex<Vec<Vec<u8>>>,
    pub admitted: Mutex<Vec<Vec<u8>>>,
    pub cleared: Mutex<Vec<Vec<u8>>>,
}

impl ChainService for Recorder {
    fn merge_chain(&self, encoded_chain: &[u8]) -> Admission {
        self.chains.lock().push(encoded_chain.to_vec());
        Admission::Accepted
    }
}

impl PoolService for Recorder {
    fn admit(&self, encoded_transaction: &[u8]) -> Admission {
        self.admitted.lock().push(encoded_transaction.to_vec());
        Admission::Accepted
    }

    fn clear(&self, encoded_transactions: &[u8]) {
        self.cleared.lock().push(encoded_transactions.to_vec());
    }
}

/// A started loopback server with short timeouts.
pub async fn start_node() -> (P2pServer, Arc<Recorder>) {
    start_node_with(test_config()).await
}

pub async fn start_node_with(config: NetworkConfig) -> (P2pServer, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let mut server = P2pServer::new(config, recorder.clone(), recorder.clone());
    server.start().await.unwrap();
    (server, recorder)
}

pub fn test_config() -> NetworkConfig {
    let mut config = NetworkConfig::loopback();
    config.connect_timeout = Duration::from_secs(1);
    config.write_timeout = Duration::from_secs(1);
    config.shutdown_grace = Duration::from_secs(1);
    config
}

pub fn address_of(server: &P2pServer) -> PeerAddress {
    server.local_address().cloned().unwrap()
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Write one length-prefixed frame with the given body.
pub async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

pub async fn write_envelope(stream: &mut TcpStream, envelope: &Envelope) {
    write_frame(stream, &envelope.encode()).await;
}
