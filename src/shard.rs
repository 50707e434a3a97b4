//! The I/O-shard task model, re-expressed over tokio rather than epoll +
//! pthreads: each [`Shard`] owns one exclusive [`Server`] plus the outbox
//! channels for its connections, preserving a "single I/O thread owns
//! jobs/functions/connections" invariant. The self-pipe wakeup mechanism
//! becomes a pair of `tokio::sync::mpsc` channels --
//! `new_conns` (the acceptor's round-robin hand-off) and an internal
//! `events` channel fed by per-connection reader tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::queue::QueueBackend;
use crate::server::dispatch::{dispatch as dispatch_packet, disconnect};
use crate::server::{Effect, Server};
use crate::types::ids::ConnectionId;
use crate::wire::events::GearmanEvent;
use crate::wire::{self, Codec, Outbound};

type ConnFramed = Framed<TcpStream, Codec>;

enum ShardEvent {
    Packet { from: ConnectionId, event: GearmanEvent },
    Disconnected { from: ConnectionId },
}

pub struct Shard {
    server: Server,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    events_tx: mpsc::Sender<ShardEvent>,
    events_rx: mpsc::Receiver<ShardEvent>,
}

impl Shard {
    pub fn new(handle_prefix: String, queue: Arc<dyn QueueBackend>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1024);
        Shard { server: Server::new(handle_prefix, queue), outboxes: HashMap::new(), events_tx, events_rx }
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    /// Drives this shard until `cancel` fires or the acceptor's hand-off
    /// channel closes. `new_conns` is this shard's slice of the acceptor's
    /// round-robin distribution.
    pub async fn run(
        mut self,
        mut new_conns: mpsc::Receiver<(TcpStream, SocketAddr)>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("shard cancelled, draining in-flight writes and exiting");
                    break;
                },
                conn = new_conns.recv() => {
                    match conn {
                        Some((stream, peer)) => self.accept(stream, peer, cancel.clone()),
                        None => break,
                    }
                },
                event = self.events_rx.recv() => {
                    match event {
                        Some(ShardEvent::Packet { from, event }) => self.handle_packet(from, event).await,
                        Some(ShardEvent::Disconnected { from }) => self.handle_disconnect(from).await,
                        None => unreachable!("shard holds its own sender"),
                    }
                },
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        if let Err(error) = stream.set_nodelay(true) {
            warn!(%error, "failed to set TCP_NODELAY");
        }

        let id = self.server.add_connection(peer.to_string());
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        self.outboxes.insert(id, outbox_tx.clone());

        let (sink, stream) = wire::framed(stream).split();
        let events_tx = self.events_tx.clone();

        tokio::spawn(reader_task(id, stream, outbox_tx, events_tx, cancel));
        tokio::spawn(writer_task(sink, outbox_rx));
    }

    async fn handle_packet(&mut self, from: ConnectionId, event: GearmanEvent) {
        if !self.server.connections.contains(from.0) {
            return;
        }
        let effects = dispatch_packet(&mut self.server, from, event).await;
        self.apply(effects);
    }

    async fn handle_disconnect(&mut self, from: ConnectionId) {
        self.outboxes.remove(&from);
        if self.server.connections.contains(from.0) {
            disconnect(&mut self.server, from).await;
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, out } => {
                    if let Some(tx) = self.outboxes.get(&to) {
                        let _ = tx.send(out);
                    }
                },
                // Dropping the outbox sender lets every effect queued ahead
                // of this one drain through the writer task first; the
                // reader task notices the socket close on its next poll and
                // reports `Disconnected` for the rest of the teardown.
                Effect::Close { to, .. } => {
                    self.outboxes.remove(&to);
                },
            }
        }
    }
}

#[instrument(name = "shard_conn", skip_all, fields(id = id.0))]
async fn reader_task(
    id: ConnectionId,
    mut stream: SplitStream<ConnFramed>,
    outbox: mpsc::UnboundedSender<Outbound>,
    events_tx: mpsc::Sender<ShardEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Ok(GearmanEvent::Discarded)) => continue,
            Some(Ok(event)) => {
                if events_tx.send(ShardEvent::Packet { from: id, event }).await.is_err() {
                    break;
                }
            },
            Some(Err(error)) => {
                if let Some(resp) = error.as_response() {
                    let _ = outbox.send(resp.into());
                }
                break;
            },
        }
    }
    let _ = events_tx.send(ShardEvent::Disconnected { from: id }).await;
}

async fn writer_task(mut sink: SplitSink<ConnFramed, Outbound>, mut outbox: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(out) = outbox.recv().await {
        if sink.send(out).await.is_err() {
            break;
        }
    }
}
