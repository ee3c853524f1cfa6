use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;
use log::warn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;

use super::{EventSender, SessionEvent};
use crate::wire::{PeerAddr, TunnelId};

const LISTEN_BACKLOG: u32 = 5;
const READ_BUF_SIZE: usize = 16 * 1024;

/// Result of attempting to deliver a frame's payload to a tracked peer.
pub enum WriteOutcome {
    /// Delivered to the peer's write half.
    Delivered,
    /// `peer` is not in this listener's table at all: a protocol desync, the
    /// caller must close the whole listener.
    Miss,
    /// `peer` was tracked but the write failed (e.g. broken pipe). The
    /// connection has already been removed from the peer table; the caller
    /// only needs to signal closure upstream.
    Closed,
}

struct Connection {
    write_half: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Binds a stream socket on `127.0.0.1:port` with address reuse and a
/// backlog of 5. Owns the accept loop and every accepted connection's peer
/// table entry.
pub struct TcpListenerState {
    accept_task: JoinHandle<()>,
    peers: HashMap<PeerAddr, Connection>,
}

impl TcpListenerState {
    pub async fn bind(port: u16, id: TunnelId, events: EventSender) -> std::io::Result<Self> {
        let listener = bind_reuseaddr(port)?;
        let accept_task = tokio::spawn(accept_loop(listener, id, events));
        Ok(Self {
            accept_task,
            peers: HashMap::new(),
        })
    }

    pub fn insert_peer(&mut self, peer: PeerAddr, write_half: OwnedWriteHalf, reader_task: JoinHandle<()>) {
        self.peers.insert(
            peer,
            Connection {
                write_half,
                reader_task,
            },
        );
    }

    pub fn remove_peer(&mut self, peer: &PeerAddr) {
        self.peers.remove(peer);
    }

    /// Sends `payload` on the socket for `peer`. A write failure on a
    /// tracked peer closes that connection (removes it from the table) the
    /// same way a read error does; an untracked peer is reported as a miss
    /// so the caller can close the whole listener.
    pub async fn write_to(&mut self, peer: PeerAddr, payload: &[u8]) -> WriteOutcome {
        match self.peers.get_mut(&peer) {
            Some(conn) => match conn.write_half.write_all(payload).await {
                Ok(()) => WriteOutcome::Delivered,
                Err(err) => {
                    warn!("tcp write to {peer:?} failed: {err}, closing connection");
                    self.peers.remove(&peer);
                    WriteOutcome::Closed
                }
            },
            None => WriteOutcome::Miss,
        }
    }
}

impl Drop for TcpListenerState {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn bind_reuseaddr(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(listener: TcpListener, id: TunnelId, events: EventSender) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let peer = PeerAddr::from_socket_addr(addr);
                let (read_half, write_half) = stream.into_split();
                let reader_task = tokio::spawn(read_loop(read_half, id, peer, events.clone()));
                if events
                    .send(SessionEvent::ClientOpen {
                        id,
                        peer,
                        write_half,
                        reader_task,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                warn!("accept failed on tcp listener port {}: {err}", id.port);
                return;
            }
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, id: TunnelId, peer: PeerAddr, events: EventSender) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(SessionEvent::ClientClose { id, peer });
                return;
            }
            Ok(n) => {
                let payload = Bytes::copy_from_slice(&buf[..n]);
                if events.send(SessionEvent::ClientData { id, peer, payload }).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("tcp read from {peer:?} failed: {err}");
                let _ = events.send(SessionEvent::ClientClose { id, peer });
                return;
            }
        }
    }
}
