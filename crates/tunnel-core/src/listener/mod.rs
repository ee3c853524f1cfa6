//! Local listeners: loopback sockets that translate local I/O events into
//! tunnel events. Two variants share a contract (receive an event, accept a
//! payload to deliver, close) modeled here as a tagged enum rather than a
//! trait object, since the set of variants is closed and small.

mod tcp;
mod udp;

pub use tcp::{TcpListenerState, WriteOutcome};
pub use udp::UdpListenerState;

use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::wire::{PeerAddr, TunnelId};

/// Emitted by a listener task up to the owning [`crate::session::Session`].
#[derive(Debug)]
pub enum SessionEvent {
    ClientData {
        id: TunnelId,
        peer: PeerAddr,
        payload: Bytes,
    },
    /// A TCP peer was just accepted. Carries the write half and the reader
    /// task's handle so the session can file both under this tunnel id's
    /// peer table; only the session's event-processing loop ever touches
    /// that table, and closing a connection means dropping both halves.
    ClientOpen {
        id: TunnelId,
        peer: PeerAddr,
        write_half: OwnedWriteHalf,
        reader_task: JoinHandle<()>,
    },
    ClientClose {
        id: TunnelId,
        peer: PeerAddr,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

pub enum ListenerState {
    Udp(UdpListenerState),
    Tcp(TcpListenerState),
}

impl ListenerState {
    pub async fn bind_udp(port: u16, id: TunnelId, events: EventSender) -> std::io::Result<Self> {
        Ok(Self::Udp(UdpListenerState::bind(port, id, events).await?))
    }

    pub async fn bind_tcp(port: u16, id: TunnelId, events: EventSender) -> std::io::Result<Self> {
        Ok(Self::Tcp(TcpListenerState::bind(port, id, events).await?))
    }
}
