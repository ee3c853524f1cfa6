//! Owns the upstream connection, the handshake state, the table of
//! listeners keyed by tunnel identifier, and the routing of inbound frames
//! to the correct listener.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::{decode_body, decode_header, encode_data, encode_state};
use crate::config::BindConfig;
use crate::error::{CodecError, FramerError, SessionError};
use crate::framer::{FramerItem, LineLengthCodec, Outbound};
use crate::listener::{EventSender, ListenerState, SessionEvent, WriteOutcome};
use crate::wire::{AddressFamily, FrameType, Header, PeerAddr, StateCode, Transport, TunnelId, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitConfig,
    Running,
    Closed,
}

pub struct Session {
    upstream: Framed<TcpStream, LineLengthCodec>,
    state: SessionState,
    configured: bool,
    pending_header: Option<Header>,
    listeners: HashMap<TunnelId, ListenerState>,
    event_tx: EventSender,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Connects to `addr` and immediately sends the metadata document as
    /// the bootstrap line. On return the session is in `AWAIT_CONFIG`.
    pub async fn connect(addr: SocketAddr, metadata: Value) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr).await.map_err(SessionError::TransportRefused)?;
        let mut upstream = Framed::new(stream, LineLengthCodec::new());
        upstream
            .send(Outbound::Line(metadata.to_string()))
            .await
            .map_err(|err| SessionError::TransportLost(framer_err_to_io(err)))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            upstream,
            state: SessionState::AwaitConfig,
            configured: false,
            pending_header: None,
            listeners: HashMap::new(),
            event_tx,
            event_rx,
        })
    }

    /// Runs the event loop until the session reaches `CLOSED`.
    pub async fn run(mut self) {
        loop {
            if self.state == SessionState::Closed {
                return;
            }
            tokio::select! {
                item = self.upstream.next() => {
                    match item {
                        Some(Ok(item)) => self.handle_upstream_item(item).await,
                        Some(Err(err)) => {
                            warn!("upstream framing error: {err}");
                            self.close().await;
                        }
                        None => {
                            warn!("upstream connection closed by server");
                            self.close().await;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_listener_event(event).await;
                }
            }
        }
    }

    async fn handle_upstream_item(&mut self, item: FramerItem) {
        match (self.state, item) {
            (SessionState::AwaitConfig, FramerItem::Line(line)) => {
                if self.configured {
                    warn!("received a second configuration line; protocol violation");
                    self.close().await;
                    return;
                }
                self.configured = true;
                match self.apply_config(&line).await {
                    Ok(()) => {
                        self.state = SessionState::Running;
                        self.upstream.codec_mut().set_mode(HEADER_SIZE);
                        info!("session configured with {} listener(s), now running", self.listeners.len());
                    }
                    Err(err) => {
                        warn!("configuration failed: {err}");
                        self.close().await;
                    }
                }
            }
            (SessionState::Running, FramerItem::Chunk(bytes)) => self.handle_chunk(bytes).await,
            (state, item) => {
                warn!("received {item:?} while in state {state:?}; protocol violation");
                self.close().await;
            }
        }
    }

    async fn handle_chunk(&mut self, bytes: Bytes) {
        match self.pending_header.take() {
            None => match decode_header(&bytes) {
                Ok(header) => {
                    if (header.total_length as usize) <= HEADER_SIZE {
                        warn!("frame header declares an empty or too-short body (total_length={})", header.total_length);
                        self.close().await;
                        return;
                    }
                    let body_len = header.total_length as usize - HEADER_SIZE;
                    self.upstream.codec_mut().set_mode(body_len);
                    self.pending_header = Some(header);
                }
                Err(err) => {
                    warn!("malformed frame header: {err}");
                    self.close().await;
                }
            },
            Some(header) => {
                self.upstream.codec_mut().set_mode(HEADER_SIZE);
                match decode_body(&header, bytes) {
                    Ok((peer, rest)) => self.dispatch_frame(header, peer, rest).await,
                    Err(err) => {
                        warn!(
                            "malformed frame body for port {} (family {:?}, transport {:?}): {err}",
                            header.port, header.family, header.transport
                        );
                        self.close().await;
                    }
                }
            }
        }
    }

    async fn dispatch_frame(&mut self, header: Header, peer: PeerAddr, rest: Bytes) {
        match header.frame_type {
            FrameType::Data => {
                let id = TunnelId {
                    family: header.family,
                    transport: header.transport,
                    port: header.port,
                };
                self.deliver_to_listener(id, peer, rest).await;
            }
            FrameType::State => {
                warn!(
                    "server sent a STATE frame for port {} peer {peer:?}; this client treats server-originated STATE as a protocol violation",
                    header.port
                );
                self.close().await;
            }
        }
    }

    async fn deliver_to_listener(&mut self, id: TunnelId, peer: PeerAddr, payload: Bytes) {
        let Some(listener) = self.listeners.get_mut(&id) else {
            warn!("data frame addressed to unknown tunnel id {id:?}; protocol violation");
            self.close().await;
            return;
        };
        match listener {
            ListenerState::Udp(udp) => {
                if let Err(err) = udp.send_to(peer, &payload).await {
                    warn!("udp send to {peer:?} on port {} failed: {err}", id.port);
                }
            }
            ListenerState::Tcp(tcp) => match tcp.write_to(peer, &payload).await {
                WriteOutcome::Delivered => {}
                WriteOutcome::Miss => {
                    warn!(
                        "data frame for untracked peer {peer:?} on tcp listener port {}; closing listener",
                        id.port
                    );
                    self.listeners.remove(&id);
                }
                WriteOutcome::Closed => {
                    self.send_frame_for(id, move |transport, family, port| {
                        encode_state(transport, family, port, peer, StateCode::Close)
                    })
                    .await;
                }
            },
        }
    }

    async fn handle_listener_event(&mut self, event: SessionEvent) {
        if self.state != SessionState::Running {
            warn!("listener event fired before the handshake completed; protocol violation");
            self.close().await;
            return;
        }
        match event {
            SessionEvent::ClientData { id, peer, payload } => {
                self.send_frame_for(id, move |transport, family, port| {
                    encode_data(transport, family, port, peer, &payload)
                })
                .await;
            }
            SessionEvent::ClientOpen {
                id,
                peer,
                write_half,
                reader_task,
            } => {
                if let Some(ListenerState::Tcp(tcp)) = self.listeners.get_mut(&id) {
                    tcp.insert_peer(peer, write_half, reader_task);
                }
                self.send_frame_for(id, move |transport, family, port| {
                    encode_state(transport, family, port, peer, StateCode::Open)
                })
                .await;
            }
            SessionEvent::ClientClose { id, peer } => {
                if let Some(ListenerState::Tcp(tcp)) = self.listeners.get_mut(&id) {
                    tcp.remove_peer(&peer);
                }
                self.send_frame_for(id, move |transport, family, port| {
                    encode_state(transport, family, port, peer, StateCode::Close)
                })
                .await;
            }
        }
    }

    async fn send_frame_for(
        &mut self,
        id: TunnelId,
        encode: impl FnOnce(Transport, AddressFamily, u16) -> Result<Bytes, CodecError>,
    ) {
        match encode(id.transport, id.family, id.port) {
            Ok(bytes) => {
                if let Err(err) = self.upstream.send(Outbound::Frame(bytes)).await {
                    warn!("failed to write frame upstream: {err}");
                    self.close().await;
                }
            }
            Err(err) => warn!("failed to encode frame for port {}: {err}", id.port),
        }
    }

    async fn apply_config(&mut self, line: &str) -> Result<(), SessionError> {
        let config: BindConfig = serde_json::from_str(line)?;
        let mut bound: HashMap<TunnelId, ListenerState> = HashMap::new();
        let mut all_ok = true;

        for spec in &config.bind {
            match self.bind_one(spec).await {
                Ok((id, listener)) => {
                    bound.insert(id, listener);
                }
                Err(err) => {
                    warn!("failed to bind port {}: {err}", spec.port);
                    all_ok = false;
                }
            }
        }

        if !all_ok || bound.len() != config.bind.len() {
            return Err(SessionError::BindFailed);
        }

        self.listeners = bound;
        Ok(())
    }

    async fn bind_one(&self, spec: &crate::config::BindSpec) -> std::io::Result<(TunnelId, ListenerState)> {
        let transport = Transport::try_from(spec.protocol).map_err(to_io_err)?;
        let requested_family = AddressFamily::try_from(spec.family).map_err(to_io_err)?;
        if requested_family != AddressFamily::V4 {
            warn!(
                "bind spec for port {} requested {requested_family:?}; local listeners are hard-wired to 127.0.0.1, downgrading to IPv4",
                spec.port
            );
        }
        let id = TunnelId {
            family: AddressFamily::V4,
            transport,
            port: spec.port,
        };
        let listener = match transport {
            Transport::Udp => ListenerState::bind_udp(spec.port, id, self.event_tx.clone()).await?,
            Transport::Tcp => ListenerState::bind_tcp(spec.port, id, self.event_tx.clone()).await?,
        };
        Ok((id, listener))
    }

    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.listeners.clear();
        let _ = self.upstream.close().await;
    }
}

fn to_io_err<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
}

fn framer_err_to_io(err: FramerError) -> std::io::Error {
    match err {
        FramerError::Io(err) => err,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}
