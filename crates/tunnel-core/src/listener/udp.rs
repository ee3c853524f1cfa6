use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use log::warn;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::{EventSender, SessionEvent};
use crate::wire::{PeerAddr, TunnelId};

const RECV_BUF_SIZE: usize = 64 * 1024;

/// Binds a datagram socket on `127.0.0.1:port` with address reuse. Every
/// received datagram is forwarded upward as a `ClientData` event; there is
/// no per-peer state to track.
pub struct UdpListenerState {
    socket: Arc<UdpSocket>,
    recv_task: JoinHandle<()>,
}

impl UdpListenerState {
    pub async fn bind(port: u16, id: TunnelId, events: EventSender) -> std::io::Result<Self> {
        let socket = Arc::new(bind_reuseaddr(port)?);
        let recv_task = tokio::spawn(recv_loop(socket.clone(), id, events));
        Ok(Self { socket, recv_task })
    }

    /// Sends exactly one datagram to `peer` on the bound socket.
    pub async fn send_to(&self, peer: PeerAddr, payload: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(payload, peer.to_socket_addr()).await?;
        Ok(())
    }
}

impl Drop for UdpListenerState {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

fn bind_reuseaddr(port: u16) -> std::io::Result<UdpSocket> {
    let addr: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn recv_loop(socket: Arc<UdpSocket>, id: TunnelId, events: EventSender) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let payload = Bytes::copy_from_slice(&buf[..n]);
                let peer = PeerAddr::from_socket_addr(from);
                if events.send(SessionEvent::ClientData { id, peer, payload }).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("udp listener on port {} stopped reading: {err}", id.port);
                return;
            }
        }
    }
}
