//! Peer registry: the live table of known peers and their connections.
//!
//! The registry is shared by the listener, discovery, every connection read
//! loop and the broadcast dispatcher. All mutation happens under one lock
//! that is never held across an `.await`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::address::PeerAddress;
use crate::connection::{Connection, ConnectionId};

/// How a closed peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Local shutdown, remote EOF or a duplicate connection being dropped.
    Graceful,
    /// I/O failure, timeout or a failed send.
    Error,
}

/// Lifecycle state of a peer.
///
/// States only move forward: `Discovering → Pairing → Active → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Candidate address picked by discovery, not yet connected.
    Discovering,
    /// Outbound socket open, registration being sent.
    Pairing,
    /// Registration exchanged.
    Active,
    /// Connection gone; the peer is no longer in the registry.
    Closed(CloseReason),
}

impl PeerState {
    fn rank(self) -> u8 {
        match self {
            Self::Discovering => 0,
            Self::Pairing => 1,
            Self::Active => 2,
            Self::Closed(_) => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: PeerState) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A registry entry: a remote node and the connection we hold to it.
#[derive(Debug)]
pub struct Peer {
    address: PeerAddress,
    connection: Connection,
    state: PeerState,
    registered_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Peer {
    pub fn new(address: PeerAddress, connection: Connection, state: PeerState) -> Self {
        let now = Utc::now();
        Self {
            address,
            connection,
            state,
            registered_at: now,
            last_activity: now,
        }
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            address: self.address.clone(),
            state: self.state,
            direction: self.connection.direction(),
            connection_id: self.connection.id(),
            registered_at: self.registered_at,
            last_activity: self.last_activity,
        }
    }

    fn close(mut self, reason: CloseReason) -> PeerInfo {
        self.state = PeerState::Closed(reason);
        self.connection.close();
        self.info()
    }
}

/// A point-in-time view of a peer, detached from its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: PeerAddress,
    pub state: PeerState,
    pub direction: Direction,
    pub connection_id: ConnectionId,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Outcome of registering a peer that introduced itself on an inbound
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRegistration {
    /// The address was unknown and is now registered.
    Inserted,
    /// Both sides opened a connection at once; the outbound entry was
    /// replaced by this inbound one.
    Replaced,
    /// The address is already registered; the new connection must be closed.
    Duplicate,
}

/// Registry of live peers, keyed by address.
#[derive(Debug, Default)]
pub struct Registry {
    peers: RwLock<HashMap<PeerAddress, Peer>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer unless its address is already registered.
    ///
    /// Idempotent: an existing entry is left untouched and the rejected peer
    /// is handed back to the caller, whose connection it still owns.
    pub fn insert(&self, peer: Peer) -> Result<(), Peer> {
        let mut peers = self.peers.write();
        if peers.contains_key(&peer.address) {
            return Err(peer);
        }
        peers.insert(peer.address.clone(), peer);
        Ok(())
    }

    /// Register a peer that announced itself on an inbound connection.
    ///
    /// When the address is already held through an outbound connection, both
    /// nodes dialled each other. The connection initiated by the node with
    /// the lower address is kept, so both sides settle on the same socket.
    pub fn register_inbound(&self, peer: Peer, local: &PeerAddress) -> InboundRegistration {
        let replaced = {
            let mut peers = self.peers.write();
            let remote_wins = peers.get(&peer.address).map(|existing| {
                existing.connection.direction() == Direction::Outbound && peer.address < *local
            });
            match remote_wins {
                None => {
                    peers.insert(peer.address.clone(), peer);
                    return InboundRegistration::Inserted;
                }
                Some(true) => peers.insert(peer.address.clone(), peer),
                Some(false) => return InboundRegistration::Duplicate,
            }
        };
        if let Some(old) = replaced {
            old.close(CloseReason::Graceful);
        }
        InboundRegistration::Replaced
    }

    /// Move a peer forward in its lifecycle, if `connection` still owns the
    /// entry and the transition is legal.
    pub fn advance(&self, address: &PeerAddress, connection: ConnectionId, next: PeerState) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(address) {
            Some(peer)
                if peer.connection.id() == connection && peer.state.can_advance_to(next) =>
            {
                peer.state = next;
                true
            }
            _ => false,
        }
    }

    /// Refresh the last-activity timestamp of a peer.
    pub fn touch(&self, address: &PeerAddress, connection: ConnectionId) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(address) {
            Some(peer) if peer.connection.id() == connection => {
                peer.last_activity = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Remove a peer by address and close its connection.
    pub fn remove(&self, address: &PeerAddress, reason: CloseReason) -> Option<PeerInfo> {
        let removed = self.peers.write().remove(address);
        removed.map(|peer| peer.close(reason))
    }

    /// Remove a peer only if its entry is still backed by `connection`.
    ///
    /// A stale connection failing must not evict a newer entry for the same
    /// address.
    pub fn remove_connection(
        &self,
        address: &PeerAddress,
        connection: ConnectionId,
        reason: CloseReason,
    ) -> Option<PeerInfo> {
        let removed = {
            let mut peers = self.peers.write();
            match peers.get(address) {
                Some(peer) if peer.connection.id() == connection => peers.remove(address),
                _ => None,
            }
        };
        removed.map(|peer| peer.close(reason))
    }

    /// Remove every peer, closing all connections.
    pub fn drain(&self, reason: CloseReason) -> Vec<PeerInfo> {
        let drained: Vec<Peer> = self.peers.write().drain().map(|(_, peer)| peer).collect();
        drained.into_iter().map(|peer| peer.close(reason)).collect()
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.read().contains_key(address)
    }

    pub fn get(&self, address: &PeerAddress) -> Option<PeerInfo> {
        self.peers.read().get(address).map(Peer::info)
    }

    /// Snapshot of every registered peer.
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers.read().values().map(Peer::info).collect()
    }

    /// Addresses and connection handles of all active peers, copied out so
    /// the caller can perform network I/O without holding the lock.
    pub fn active_connections(&self) -> Vec<(PeerAddress, Connection)> {
        self.peers
            .read()
            .values()
            .filter(|peer| peer.state == PeerState::Active)
            .map(|peer| (peer.address.clone(), peer.connection.clone()))
            .collect()
    }

    /// Return the number of active peers.
    pub fn active_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|peer| peer.state == PeerState::Active)
            .count()
    }

    /// Return the total number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
