//! P2pServer: top-level coordinator for a node's networking layer.
//!
//! [`P2pServer`] owns the peer registry and every background task:
//! - TCP accept loop (inbound peers)
//! - Bootstrap pairing with `known_peers`
//! - Subnet discovery sweep
//! - Keep-alive loop (re-sends our registration to every peer)
//!
//! The node's chain and pool logic plugs in through [`ChainService`] and
//! [`PoolService`]; the server only moves their bytes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::broadcast::{BroadcastReport, Dispatcher};
use crate::config::NetworkConfig;
use crate::connection::{ConnectionContext, ConnectionOptions};
use crate::discovery::{self, Discovery, PairOutcome};
use crate::error::{NetworkError, Result};
use crate::listener;
use crate::message::Envelope;
use crate::peer::{CloseReason, PeerInfo, Registry};
use crate::router::InboundRouter;
use crate::services::{ChainService, PoolService};
use crate::tasks::TaskSet;

/// A node's P2P server.
///
/// Create one per node. Call [`start()`](P2pServer::start) to begin accepting
/// connections and discovering peers. Several servers can run in one process;
/// each has its own registry.
pub struct P2pServer {
    /// Network configuration.
    config: NetworkConfig,
    /// Registry of live peers.
    registry: Arc<Registry>,
    /// Dispatches inbound data envelopes to the chain and pool.
    router: Arc<InboundRouter>,
    /// Present while the server is running.
    running: Option<Running>,
}

struct Running {
    ctx: ConnectionContext,
    discovery: Discovery,
    dispatcher: Dispatcher,
    bound: SocketAddr,
}

impl P2pServer {
    /// Create a stopped server.
    pub fn new(
        config: NetworkConfig,
        chain: Arc<dyn ChainService>,
        pool: Arc<dyn PoolService>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            router: Arc::new(InboundRouter::new(chain, pool)),
            running: None,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether the server is currently running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The address we advertise to peers, once started.
    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.running.as_ref().map(|r| &r.ctx.local_address)
    }

    /// The socket address the listener is bound to, once started.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.bound)
    }

    /// The live peer registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Snapshot of all registered peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.registry.snapshot()
    }

    /// Start the server: bind, accept, pair with known peers, keep peers
    /// alive and, if enabled, sweep the local subnets.
    ///
    /// Returns the bound address. Starting a running server is a no-op.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.bound);
        }
        self.config.validate()?;

        let listener = listener::bind(self.config.listen_addr).await?;
        let bound = listener.local_addr()?;
        let local_address = advertised_address(&self.config, bound);

        let ctx = ConnectionContext {
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
            local_address: local_address.clone(),
            options: ConnectionOptions {
                max_frame_len: self.config.max_frame_len,
                write_timeout: self.config.write_timeout,
            },
            connect_timeout: self.config.connect_timeout,
            idle_timeout: self.config.idle_timeout,
            shutdown: CancellationToken::new(),
            tasks: TaskSet::default(),
        };
        let discovery = Discovery::new(
            ctx.clone(),
            local_address.port(),
            self.config.discovery.fan_out,
            self.config.discovery.max_candidates_per_interface,
        );
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry));

        ctx.tasks.spawn(listener::accept_loop(listener, ctx.clone()));

        ctx.tasks.spawn(keepalive_loop(
            dispatcher.clone(),
            local_address.clone(),
            self.config.keepalive_interval,
            ctx.shutdown.clone(),
        ));

        if !self.config.known_peers.is_empty() {
            let bootstrap = discovery.clone();
            let known_peers = self.config.known_peers.clone();
            ctx.tasks.spawn(async move {
                let report = bootstrap.sweep(known_peers).await;
                info!(
                    "Bootstrap pairing: {}/{} known peers paired",
                    report.paired, report.attempted
                );
            });
        }

        let running = Running {
            ctx,
            discovery,
            dispatcher,
            bound,
        };
        if self.config.discovery_enabled {
            if let Err(e) = running.discovery.start() {
                warn!("Discovery start failed (non-fatal): {e}");
            }
        }
        self.running = Some(running);

        info!("P2pServer started on {bound}, advertising {local_address}");
        Ok(bound)
    }

    /// Stop the server: end every background task, close every connection
    /// and empty the registry. Returns within the configured shutdown grace
    /// even if peers never close their sockets.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.ctx.shutdown.cancel();
        debug!("Waiting for {} background tasks", running.ctx.tasks.len());
        let closed = self.registry.drain(CloseReason::Graceful);
        let aborted = running.ctx.tasks.shutdown(self.config.shutdown_grace).await;
        if aborted > 0 {
            debug!("Aborted {aborted} tasks still running after {:?}", self.config.shutdown_grace);
        }

        info!(
            "P2pServer on {} stopped ({} peers closed)",
            running.bound,
            closed.len()
        );
    }

    /// Pair with a single peer and wait for the outcome.
    pub async fn pair(&self, addr: PeerAddress) -> Result<PairOutcome> {
        let running = self.running()?;
        Ok(running.discovery.pair(addr).await)
    }

    /// Sweep the local subnets in the background. Returns immediately.
    pub fn start_discovery(&self) -> Result<()> {
        self.running()?.discovery.start()
    }

    /// Send an envelope to every active peer.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport> {
        let running = self.running()?;
        Ok(running.dispatcher.broadcast(envelope).await)
    }

    /// Announce our chain to every peer.
    pub async fn broadcast_chain<B: Serialize>(&self, blocks: &[B]) -> Result<BroadcastReport> {
        self.running()?;
        self.broadcast(&Envelope::chain(blocks)?).await
    }

    /// Relay a new transaction to every peer.
    pub async fn broadcast_transaction<T: Serialize>(
        &self,
        transaction: &T,
    ) -> Result<BroadcastReport> {
        self.running()?;
        self.broadcast(&Envelope::transaction(transaction)?).await
    }

    /// Tell every peer to drop these now-confirmed transactions from its pool.
    pub async fn broadcast_clear<T: Serialize>(
        &self,
        transactions: &[T],
    ) -> Result<BroadcastReport> {
        self.running()?;
        self.broadcast(&Envelope::clear_pool(transactions)?).await
    }

    fn running(&self) -> Result<&Running> {
        self.running.as_ref().ok_or(NetworkError::NotRunning)
    }
}

impl Drop for P2pServer {
    fn drop(&mut self) {
        // Tasks observe the token and wind down on their own.
        if let Some(running) = &self.running {
            running.ctx.shutdown.cancel();
        }
    }
}

/// The address peers should use to reach us.
///
/// An explicit `advertise_host` wins, then a specific listen IP, then the
/// first non-loopback IPv4 interface, then loopback. The port is always the
/// bound port.
fn advertised_address(config: &NetworkConfig, bound: SocketAddr) -> PeerAddress {
    let port = bound.port();
    if let Some(host) = &config.advertise_host {
        return PeerAddress::new(host.clone(), port);
    }
    if !bound.ip().is_unspecified() {
        return PeerAddress::from(bound);
    }
    let host = discovery::local_interfaces()
        .ok()
        .and_then(|interfaces| interfaces.first().map(|iface| iface.ip.to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_string());
    PeerAddress::new(host, port)
}

/// Keep-alive loop: re-sends our registration to every active peer so quiet
/// but healthy connections stay inside the remote idle timeout.
async fn keepalive_loop(
    dispatcher: Dispatcher,
    local_address: PeerAddress,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    let registration = Envelope::registration(&local_address);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Keep-alive loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let report = dispatcher.broadcast(&registration).await;
                if !report.failed.is_empty() {
                    debug!("Keep-alive dropped {} unreachable peers", report.failed.len());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
