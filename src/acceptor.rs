//! The listener/acceptor: binds a configured `host:port`, applies
//! `TCP_NODELAY` and the listen backlog via `socket2` the way
//! `pelikan-io-grow-a-cache` configures its listening sockets, and hands
//! accepted connections off to shards round-robin.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Binds `addr` with the given listen backlog, non-blocking, ready to be
/// handed to `tokio::net::TcpListener::from_std`.
fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => socket2::Domain::IPV4,
        SocketAddr::V6(_) => socket2::Domain::IPV6,
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(socket.into())
}

/// Accepts connections on `addr` until `cancel` fires, handing each off
/// round-robin across `shard_txs` so every shard gets a fair share of new
/// connections.
pub async fn run(
    addr: SocketAddr,
    backlog: u32,
    shard_txs: Vec<mpsc::Sender<(TcpStream, SocketAddr)>>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let std_listener = bind_listener(addr, backlog)?;
    let listener = TcpListener::from_std(std_listener)?;
    debug!(%addr, shards = shard_txs.len(), "listening");

    let mut next_shard = 0usize;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let shard = &shard_txs[next_shard];
                next_shard = (next_shard + 1) % shard_txs.len();
                if shard.send((stream, peer)).await.is_err() {
                    error!("shard hand-off channel closed, dropping connection");
                }
            },
            Err(error) => {
                warn!(%error, "accept failed");
            },
        }
    }
}
