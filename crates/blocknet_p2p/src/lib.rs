//! Blocknet P2P: peer discovery, peer registry and state broadcast for a
//! blockchain node.
//!
//! Nodes find each other on the local subnets, keep a registry of live
//! peers, and push chain, transaction and pool-clear announcements to every
//! peer. Chain validation and pool logic stay with the node; they plug in
//! through [`ChainService`] and [`PoolService`].
//!
//! # Architecture
//!
//! - **Transport**: plain TCP, one connection per peer pair.
//! - **Framing**: `u32` big-endian length prefix, then a version byte, a kind
//!   byte and the payload.
//! - **Discovery**: netmask-derived sweep of each local subnet on the service
//!   port, with bounded fan-out.
//! - **Broadcast**: best-effort, concurrent, at most once per peer.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blocknet_p2p::{Admission, ChainService, NetworkConfig, P2pServer, PoolService};
//!
//! struct Node;
//!
//! impl ChainService for Node {
//!     fn merge_chain(&self, _encoded_chain: &[u8]) -> Admission {
//!         Admission::Accepted
//!     }
//! }
//!
//! impl PoolService for Node {
//!     fn admit(&self, _encoded_transaction: &[u8]) -> Admission {
//!         Admission::Accepted
//!     }
//!     fn clear(&self, _encoded_transactions: &[u8]) {}
//! }
//!
//! # async fn example() -> blocknet_p2p::Result<()> {
//! let node = Arc::new(Node);
//! let mut server = P2pServer::new(NetworkConfig::default(), node.clone(), node);
//!
//! server.start().await?;
//! server.broadcast_transaction(&serde_json::json!({"id": "tx-1"})).await?;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod framing;
mod listener;
pub mod logging;
pub mod message;
pub mod payload;
pub mod peer;
pub mod router;
pub mod server;
pub mod services;
mod tasks;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use address::PeerAddress;
pub use broadcast::BroadcastReport;
pub use config::{DEFAULT_PORT, DiscoveryConfig, NetworkConfig};
pub use connection::{Connection, ConnectionId};
pub use discovery::{PairOutcome, SweepReport};
pub use error::{EnvelopeError, NetworkError, Result};
pub use message::{Envelope, EnvelopeKind, WIRE_VERSION};
pub use payload::decode_payload;
pub use peer::{CloseReason, Direction, PeerInfo, PeerState, Registry};
pub use server::P2pServer;
pub use services::{Admission, ChainService, PoolService};
