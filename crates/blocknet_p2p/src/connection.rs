//! Peer connections: framed TCP streams with a send handle and a read loop.
//!
//! A [`Connection`] is the write side of one socket. The read side is owned
//! by a background task that decodes envelopes in arrival order, keeps the
//! registry up to date and forwards data envelopes to the [`InboundRouter`].
//! Any I/O failure ends the task, which removes the peer from the registry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::address::PeerAddress;
use crate::error::{NetworkError, Result};
use crate::framing::EnvelopeCodec;
use crate::message::{Envelope, EnvelopeKind};
use crate::peer::{CloseReason, Direction, InboundRegistration, Peer, PeerState, Registry};
use crate::router::InboundRouter;
use crate::tasks::TaskSet;

/// The read half of a connection, yielding decoded envelopes.
pub type EnvelopeReader = FramedRead<OwnedReadHalf, EnvelopeCodec>;

type EnvelopeWriter = FramedWrite<OwnedWriteHalf, EnvelopeCodec>;

/// Unique identifier of one connection, distinguishing successive
/// connections to the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionOptions {
    pub max_frame_len: usize,
    pub write_timeout: Duration,
}

/// A handle to an open connection with a peer.
///
/// Cheap to clone; all clones share the underlying socket. `send` may be
/// called from several tasks at once, writes are serialised.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    direction: Direction,
    remote: SocketAddr,
    writer: Mutex<EnvelopeWriter>,
    write_timeout: Duration,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap a connected stream. `closed` is the token that closes this
    /// connection; pass a child of the server's shutdown token.
    pub(crate) fn open(
        stream: TcpStream,
        direction: Direction,
        options: ConnectionOptions,
        closed: CancellationToken,
    ) -> Result<(Self, EnvelopeReader)> {
        let remote = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let reader = FramedRead::new(read_half, EnvelopeCodec::new(options.max_frame_len));
        let writer = FramedWrite::new(write_half, EnvelopeCodec::new(options.max_frame_len));

        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::generate(),
                direction,
                remote,
                writer: Mutex::new(writer),
                write_timeout: options.write_timeout,
                closed,
            }),
        };
        Ok((conn, reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// The socket address of the remote end.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote
    }

    /// Send one envelope, bounded by the write timeout.
    ///
    /// A failed or timed-out write leaves the stream in an unknown state, so
    /// it closes the connection.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed);
        }

        let timeout = self.inner.write_timeout;
        let write = async {
            let mut writer = self.inner.writer.lock().await;
            writer.send(envelope.clone()).await
        };

        let result = tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => Err(NetworkError::ConnectionClosed),
            res = tokio::time::timeout(timeout, write) => {
                res.unwrap_or_else(|_| Err(NetworkError::Timeout(timeout)))
            }
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Signal the read loop to stop. The socket is released once the read
    /// loop has exited and the last handle is dropped.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection is closed, locally or by server shutdown.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// State shared by everything that opens or serves connections for one
/// server instance.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub registry: Arc<Registry>,
    pub router: Arc<InboundRouter>,
    pub local_address: PeerAddress,
    pub options: ConnectionOptions,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown: CancellationToken,
    pub tasks: TaskSet,
}

impl ConnectionContext {
    /// Wrap a stream in a connection tied to this server's shutdown.
    pub fn open(&self, stream: TcpStream, direction: Direction) -> Result<(Connection, EnvelopeReader)> {
        Connection::open(stream, direction, self.options, self.shutdown.child_token())
    }

    /// Dial a peer, bounded by the connect timeout.
    pub async fn dial(&self, addr: &PeerAddress) -> Result<(Connection, EnvelopeReader)> {
        let connect = TcpStream::connect((addr.host(), addr.port()));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| NetworkError::Timeout(self.connect_timeout))??;
        self.open(stream, Direction::Outbound)
    }

    /// Start the read loop for `conn`. `registered_as` is set for outbound
    /// connections, whose peer address is known before any data arrives.
    pub fn spawn_reader(
        &self,
        conn: Connection,
        reader: EnvelopeReader,
        registered_as: Option<PeerAddress>,
    ) {
        let read_loop = ReadLoop {
            ctx: self.clone(),
            conn,
            registered_as,
        };
        self.tasks.spawn(read_loop.run(reader));
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    Close,
}

struct ReadLoop {
    ctx: ConnectionContext,
    conn: Connection,
    registered_as: Option<PeerAddress>,
}

impl ReadLoop {
    async fn run(mut self, mut reader: EnvelopeReader) {
        let remote = self.conn.remote_addr();
        let idle = self.ctx.idle_timeout;

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.conn.closed() => break CloseReason::Graceful,
                next = tokio::time::timeout(idle, reader.next()) => next,
            };

            match next {
                Err(_) => {
                    debug!("No traffic from {remote} for {idle:?}, dropping connection");
                    break CloseReason::Error;
                }
                Ok(None) => {
                    debug!("Peer {remote} closed the connection");
                    break CloseReason::Graceful;
                }
                Ok(Some(Err(e))) => {
                    debug!("Read error from {remote}: {e}");
                    break CloseReason::Error;
                }
                Ok(Some(Ok(Err(e)))) => {
                    warn!("Dropping undecodable envelope from {remote}: {e}");
                }
                Ok(Some(Ok(Ok(envelope)))) => {
                    if let Flow::Close = self.handle(envelope) {
                        break CloseReason::Graceful;
                    }
                }
            }
        };

        if let Some(addr) = &self.registered_as {
            if self
                .ctx
                .registry
                .remove_connection(addr, self.conn.id(), reason)
                .is_some()
            {
                info!("Peer {addr} removed ({reason:?})");
            }
        }
        self.conn.close();
    }

    fn handle(&mut self, envelope: Envelope) -> Flow {
        trace!(
            "{} envelope ({} bytes) from {}",
            envelope.kind.as_str(),
            envelope.payload.len(),
            self.conn.remote_addr()
        );

        if let Some(addr) = &self.registered_as {
            self.ctx.registry.touch(addr, self.conn.id());
        }

        match envelope.kind {
            EnvelopeKind::Registration => self.on_registration(&envelope),
            _ => {
                let from = match &self.registered_as {
                    Some(addr) => addr.to_string(),
                    None => self.conn.remote_addr().to_string(),
                };
                self.ctx.router.route(&from, &envelope);
                Flow::Continue
            }
        }
    }

    fn on_registration(&mut self, envelope: &Envelope) -> Flow {
        let remote = self.conn.remote_addr();
        let addr = match envelope.registration_address() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Ignoring registration from {remote}: {e}");
                return Flow::Continue;
            }
        };

        if addr == self.ctx.local_address {
            debug!("Connection from {remote} is ourselves, closing");
            return Flow::Close;
        }

        if let Some(current) = &self.registered_as {
            if *current != addr {
                debug!("{current} re-registered as {addr}, keeping {current}");
            }
            return Flow::Continue;
        }

        let peer = Peer::new(addr.clone(), self.conn.clone(), PeerState::Active);
        match self
            .ctx
            .registry
            .register_inbound(peer, &self.ctx.local_address)
        {
            InboundRegistration::Inserted => {
                info!("Registered inbound peer {addr} (from {remote})");
                self.registered_as = Some(addr);
                Flow::Continue
            }
            InboundRegistration::Replaced => {
                info!("Peer {addr} dialled us concurrently, keeping its connection");
                self.registered_as = Some(addr);
                Flow::Continue
            }
            InboundRegistration::Duplicate => {
                debug!("Peer {addr} already registered, closing duplicate connection from {remote}");
                Flow::Close
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
