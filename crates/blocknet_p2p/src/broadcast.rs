//! Broadcast dispatcher: best-effort fan-out of one envelope to every
//! active peer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::address::PeerAddress;
use crate::message::Envelope;
use crate::peer::{CloseReason, Registry};

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of peers the envelope was written to.
    pub delivered: usize,
    /// Peers whose send failed; they have been removed from the registry.
    pub failed: Vec<PeerAddress>,
}

/// Writes envelopes to every active connection in the registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Send `envelope` once to each active peer.
    ///
    /// The peer list is copied out of the registry first, so a slow peer
    /// never blocks registration of others. Sends run concurrently; a failed
    /// send removes that peer and never affects delivery to the rest.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let targets = self.registry.active_connections();
        if targets.is_empty() {
            debug!("No active peers for {} broadcast", envelope.kind.as_str());
            return BroadcastReport::default();
        }

        let sends = targets.iter().map(|(addr, conn)| async move {
            let result = conn.send(envelope).await;
            (addr, conn, result)
        });
        let results = futures::future::join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (addr, conn, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Broadcast of {} to {addr} failed: {e}",
                        envelope.kind.as_str()
                    );
                    self.registry
                        .remove_connection(addr, conn.id(), CloseReason::Error);
                    report.failed.push(addr.clone());
                }
            }
        }

        debug!(
            "Broadcast {} to {}/{} peers",
            envelope.kind.as_str(),
            report.delivered,
            targets.len()
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
