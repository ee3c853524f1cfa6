//! Wire-stable identifiers for the frame header (see the frame layout in the
//! crate-level docs). These are deliberately distinct from the host
//! platform's `AF_INET`/`SOCK_STREAM` constants so the byte layout on the
//! wire never depends on the client's own target platform.

use std::net::{IpAddr, SocketAddr};

use crate::error::CodecError;

/// Header size in bytes: `total_length(2) + frame_type(2) + port(2) + family(1) + transport(1)`.
pub const HEADER_SIZE: usize = 8;

pub const MAX_FRAME_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const fn wire_value(self) -> u8 {
        match self {
            AddressFamily::V4 => 2,
            AddressFamily::V6 => 10,
        }
    }

    /// Size in bytes of the peer-address prefix this family encodes to.
    pub const fn peer_size(self) -> usize {
        match self {
            AddressFamily::V4 => 4 + 2,
            AddressFamily::V6 => 16 + 2,
        }
    }
}

impl TryFrom<u8> for AddressFamily {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(AddressFamily::V4),
            10 => Ok(AddressFamily::V6),
            other => Err(CodecError::UnknownAddressFamily(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub const fn wire_value(self) -> u8 {
        match self {
            Transport::Tcp => 1,
            Transport::Udp => 2,
        }
    }
}

impl TryFrom<u8> for Transport {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Transport::Tcp),
            2 => Ok(Transport::Udp),
            other => Err(CodecError::UnknownTransport(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    State,
    Data,
}

impl FrameType {
    pub const fn wire_value(self) -> u16 {
        match self {
            FrameType::State => 0,
            FrameType::Data => 1,
        }
    }
}

impl TryFrom<u16> for FrameType {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::State),
            1 => Ok(FrameType::Data),
            other => Err(CodecError::UnknownFrameType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCode {
    Open,
    Close,
}

impl StateCode {
    pub const fn wire_value(self) -> u16 {
        match self {
            StateCode::Open => 0,
            StateCode::Close => 1,
        }
    }
}

impl TryFrom<u16> for StateCode {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StateCode::Open),
            1 => Ok(StateCode::Close),
            other => Err(CodecError::UnknownStateCode(other)),
        }
    }
}

/// `(address_family, transport, port)`. Uniquely identifies a local listener
/// and appears on the wire so the peer can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId {
    pub family: AddressFamily,
    pub transport: Transport,
    pub port: u16,
}

/// `(ip, port)` of the local peer talking to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddr {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub total_length: u16,
    pub frame_type: FrameType,
    pub port: u16,
    pub family: AddressFamily,
    pub transport: Transport,
}
