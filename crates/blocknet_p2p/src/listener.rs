//! TCP listener and accept loop.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::connection::ConnectionContext;
use crate::error::{NetworkError, Result};
use crate::peer::Direction;

/// Pause after a failed accept (e.g. descriptor exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the listening socket.
pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::Bind { addr, source })
}

/// Accept connections until shutdown. Each accepted socket gets its own read
/// loop; the peer registers itself by sending a registration envelope.
pub(crate) async fn accept_loop(listener: TcpListener, ctx: ConnectionContext) {
    if let Ok(addr) = listener.local_addr() {
        info!("P2P server listening on {addr}");
    }

    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => match ctx.open(stream, Direction::Inbound) {
                Ok((conn, reader)) => {
                    debug!("Accepted connection from {remote}");
                    ctx.spawn_reader(conn, reader, None);
                }
                Err(e) => debug!("Dropping connection from {remote}: {e}"),
            },
            Err(e) => {
                error!("Accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    debug!("Accept loop shutting down");
}
