//! Peer discovery: direct pairing and local-subnet sweeps.
//!
//! A sweep derives candidate hosts from each local interface's address and
//! netmask, then pairs with every candidate on the service port, a bounded
//! number at a time. Discovery is advisory: unreachable candidates are
//! expected and only logged at debug level.

use std::net::Ipv4Addr;

use futures::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::address::PeerAddress;
use crate::connection::ConnectionContext;
use crate::error::Result;
use crate::message::Envelope;
use crate::peer::{CloseReason, Peer, PeerState};

/// An IPv4 address assigned to a local, non-loopback interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceV4 {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Enumerate local IPv4 interfaces that can reach a broadcast domain.
///
/// Loopback and point-to-point interfaces (no broadcast address) are
/// skipped; an interface only reports addresses while it is configured.
pub fn local_interfaces() -> Result<Vec<InterfaceV4>> {
    let interfaces = if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) if v4.broadcast.is_some() => Some(InterfaceV4 {
                name: iface.name,
                ip: v4.ip,
                netmask: v4.netmask,
            }),
            _ => None,
        })
        .collect();
    Ok(interfaces)
}

/// An IPv4 subnet given by network address and prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: u32,
    prefix_len: u8,
}

impl Subnet {
    /// Build the subnet containing `ip` under `netmask`. Returns `None` for a
    /// non-contiguous mask.
    pub fn from_netmask(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Self> {
        let mask = u32::from(netmask);
        let prefix_len = mask.leading_ones();
        if mask.checked_shl(prefix_len).unwrap_or(0) != 0 {
            return None;
        }
        Some(Self {
            network: u32::from(ip) & mask,
            prefix_len: prefix_len as u8,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn host_range(&self) -> (u32, u32) {
        match self.prefix_len {
            32 => (self.network, 0),
            31 => (self.network, 2),
            len => {
                let block = 1u64 << (32 - len as u32);
                (self.network + 1, (block - 2) as u32)
            }
        }
    }

    /// Number of usable host addresses.
    pub fn size(&self) -> u32 {
        self.host_range().1
    }

    /// Usable host addresses, lazily, excluding the network and broadcast
    /// addresses (a /31 has two usable hosts, a /32 none).
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let (first, count) = self.host_range();
        (0..count).map(move |offset| Ipv4Addr::from(first + offset))
    }
}

/// Candidate peer addresses for a sweep over `interfaces`.
///
/// Each interface contributes at most `cap_per_interface` hosts of its
/// subnet. Addresses of our own interfaces and `local` itself are never
/// proposed.
pub fn candidates<'a>(
    interfaces: &'a [InterfaceV4],
    local: &PeerAddress,
    port: u16,
    cap_per_interface: usize,
) -> impl Iterator<Item = PeerAddress> + use<'a> {
    let own: Vec<Ipv4Addr> = interfaces.iter().map(|iface| iface.ip).collect();
    let local = local.clone();
    interfaces
        .iter()
        .filter_map(|iface| Subnet::from_netmask(iface.ip, iface.netmask))
        .flat_map(move |subnet| {
            let own = own.clone();
            subnet
                .hosts()
                .filter(move |ip| !own.contains(ip))
                .take(cap_per_interface)
        })
        .map(move |ip| PeerAddress::new(ip.to_string(), port))
        .filter(move |addr| *addr != local)
}

/// Result of a single pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// Connected, registration sent, peer registered.
    Paired,
    /// The address was already registered; nothing was done.
    AlreadyRegistered,
    /// The address is our own.
    SelfAddress,
    /// The peer could not be reached or the registration write failed.
    Unreachable,
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub paired: usize,
}

/// Discovery for one server instance.
#[derive(Clone)]
pub struct Discovery {
    ctx: ConnectionContext,
    port: u16,
    fan_out: usize,
    cap_per_interface: usize,
}

impl Discovery {
    pub(crate) fn new(
        ctx: ConnectionContext,
        port: u16,
        fan_out: usize,
        cap_per_interface: usize,
    ) -> Self {
        Self {
            ctx,
            port,
            fan_out: fan_out.max(1),
            cap_per_interface,
        }
    }

    /// Pair with one peer: connect, register it, send our registration.
    ///
    /// Idempotent; an address already in the registry is left alone.
    pub async fn pair(&self, addr: PeerAddress) -> PairOutcome {
        if addr == self.ctx.local_address {
            return PairOutcome::SelfAddress;
        }
        if self.ctx.registry.contains(&addr) {
            return PairOutcome::AlreadyRegistered;
        }
        trace!("Pairing with {addr}");

        let (conn, reader) = match self.ctx.dial(&addr).await {
            Ok(opened) => opened,
            Err(e) => {
                debug!("Cannot reach {addr}: {e}");
                return PairOutcome::Unreachable;
            }
        };

        let peer = Peer::new(addr.clone(), conn.clone(), PeerState::Pairing);
        if self.ctx.registry.insert(peer).is_err() {
            // Registered concurrently, e.g. the peer dialled us first.
            conn.close();
            return PairOutcome::AlreadyRegistered;
        }
        self.ctx
            .spawn_reader(conn.clone(), reader, Some(addr.clone()));

        if let Err(e) = conn.send(&Envelope::registration(&self.ctx.local_address)).await {
            debug!("Registration with {addr} failed: {e}");
            self.ctx
                .registry
                .remove_connection(&addr, conn.id(), CloseReason::Error);
            return PairOutcome::Unreachable;
        }

        if self
            .ctx
            .registry
            .advance(&addr, conn.id(), PeerState::Active)
        {
            info!("Paired with {addr}");
            PairOutcome::Paired
        } else {
            // Replaced or dropped while we were writing the registration.
            PairOutcome::AlreadyRegistered
        }
    }

    /// Pair with every candidate, at most `fan_out` at a time. Stops early on
    /// server shutdown.
    pub async fn sweep<I>(&self, candidates: I) -> SweepReport
    where
        I: IntoIterator<Item = PeerAddress>,
    {
        let report = parking_lot::Mutex::new(SweepReport::default());
        let run = futures::stream::iter(candidates).for_each_concurrent(self.fan_out, |addr| {
            let report = &report;
            async move {
                let outcome = self.pair(addr).await;
                let mut report = report.lock();
                report.attempted += 1;
                if outcome == PairOutcome::Paired {
                    report.paired += 1;
                }
            }
        });

        tokio::select! {
            _ = run => {}
            _ = self.ctx.shutdown.cancelled() => debug!("Discovery sweep interrupted by shutdown"),
        }
        report.into_inner()
    }

    /// Sweep the local subnets in the background.
    ///
    /// Returns once the sweep is scheduled; never blocks on candidates.
    pub fn start(&self) -> Result<()> {
        let interfaces = local_interfaces()?;
        if interfaces.is_empty() {
            warn!("No non-loopback IPv4 interfaces, skipping discovery");
            return Ok(());
        }
        for iface in &interfaces {
            if let Some(subnet) = Subnet::from_netmask(iface.ip, iface.netmask) {
                debug!(
                    "Discovery on {} ({}/{}, {} hosts)",
                    iface.name,
                    subnet.network(),
                    subnet.prefix_len(),
                    subnet.size()
                );
            }
        }

        let discovery = self.clone();
        self.ctx.tasks.spawn(async move {
            let local = discovery.ctx.local_address.clone();
            let targets: Vec<PeerAddress> = candidates(
                &interfaces,
                &local,
                discovery.port,
                discovery.cap_per_interface,
            )
            .collect();
            let report = discovery.sweep(targets).await;
            info!(
                "Discovery finished: {} candidates probed, {} paired",
                report.attempted, report.paired
            );
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
