//! Encodes and decodes the binary envelope used on the upstream connection.
//! Pure and stateless: every function here operates on a byte buffer handed
//! to it by the caller and carries no state of its own between calls.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::wire::{AddressFamily, FrameType, Header, PeerAddr, StateCode, Transport, HEADER_SIZE, MAX_FRAME_LEN};

/// Builds a `DATA` frame. Fails if the encoded frame would exceed 65535 bytes.
pub fn encode_data(
    transport: Transport,
    family: AddressFamily,
    port: u16,
    peer: PeerAddr,
    payload: &[u8],
) -> Result<Bytes, CodecError> {
    let total = HEADER_SIZE + family.peer_size() + payload.len();
    if total > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(total));
    }
    let mut buf = BytesMut::with_capacity(total);
    write_header(&mut buf, total as u16, FrameType::Data, port, family, transport);
    write_peer(&mut buf, peer);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Builds a `STATE` frame carrying `OPEN` or `CLOSE`.
pub fn encode_state(
    transport: Transport,
    family: AddressFamily,
    port: u16,
    peer: PeerAddr,
    state: StateCode,
) -> Result<Bytes, CodecError> {
    let total = HEADER_SIZE + family.peer_size() + 2;
    if total > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(total));
    }
    let mut buf = BytesMut::with_capacity(total);
    write_header(&mut buf, total as u16, FrameType::State, port, family, transport);
    write_peer(&mut buf, peer);
    buf.put_u16(state.wire_value());
    Ok(buf.freeze())
}

/// Parses exactly `HEADER_SIZE` bytes. Never blocks; fails on unknown
/// address family, transport or frame type.
pub fn decode_header(bytes: &[u8]) -> Result<Header, CodecError> {
    if bytes.len() != HEADER_SIZE {
        return Err(CodecError::Truncated);
    }
    let mut cursor = bytes;
    let total_length = cursor.get_u16();
    let frame_type = FrameType::try_from(cursor.get_u16())?;
    let port = cursor.get_u16();
    let family = AddressFamily::try_from(cursor.get_u8())?;
    let transport = Transport::try_from(cursor.get_u8())?;
    Ok(Header {
        total_length,
        frame_type,
        port,
        family,
        transport,
    })
}

/// Parses the peer-address prefix using the header's address family.
/// `rest` is the remainder of `body`: payload bytes for `DATA`, a two-byte
/// state code for `STATE`.
pub fn decode_body(header: &Header, mut body: Bytes) -> Result<(PeerAddr, Bytes), CodecError> {
    let psize = header.family.peer_size();
    if body.len() < psize {
        return Err(CodecError::Truncated);
    }
    let peer_bytes = body.split_to(psize);
    let peer = read_peer(header.family, &peer_bytes)?;
    Ok((peer, body))
}

fn write_header(
    buf: &mut BytesMut,
    total_length: u16,
    frame_type: FrameType,
    port: u16,
    family: AddressFamily,
    transport: Transport,
) {
    buf.put_u16(total_length);
    buf.put_u16(frame_type.wire_value());
    buf.put_u16(port);
    buf.put_u8(family.wire_value());
    buf.put_u8(transport.wire_value());
}

fn write_peer(buf: &mut BytesMut, peer: PeerAddr) {
    match peer.ip {
        IpAddr::V4(ip) => buf.put_slice(&ip.octets()),
        IpAddr::V6(ip) => buf.put_slice(&ip.octets()),
    }
    buf.put_u16(peer.port);
}

fn read_peer(family: AddressFamily, bytes: &[u8]) -> Result<PeerAddr, CodecError> {
    match family {
        AddressFamily::V4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&bytes[0..4]);
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);
            Ok(PeerAddr {
                ip: IpAddr::V4(Ipv4Addr::from(octets)),
                port,
            })
        }
        AddressFamily::V6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[0..16]);
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);
            Ok(PeerAddr {
                ip: IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_peer() -> PeerAddr {
        PeerAddr {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 40000,
        }
    }

    fn v6_peer() -> PeerAddr {
        PeerAddr {
            ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            port: 40000,
        }
    }

    #[test]
    fn data_frame_round_trips_v4() {
        let frame = encode_data(Transport::Udp, AddressFamily::V4, 6000, v4_peer(), b"ping").unwrap();
        let header = decode_header(&frame[..HEADER_SIZE]).unwrap();
        assert_eq!(header.frame_type, FrameType::Data);
        assert_eq!(header.port, 6000);
        assert_eq!(header.family, AddressFamily::V4);
        assert_eq!(header.transport, Transport::Udp);

        let body = frame.slice(HEADER_SIZE..);
        let (peer, rest) = decode_body(&header, body).unwrap();
        assert_eq!(peer, v4_peer());
        assert_eq!(&rest[..], b"ping");
    }

    #[test]
    fn data_frame_round_trips_v6() {
        let frame = encode_data(Transport::Tcp, AddressFamily::V6, 7000, v6_peer(), b"hi").unwrap();
        let header = decode_header(&frame[..HEADER_SIZE]).unwrap();
        let body = frame.slice(HEADER_SIZE..);
        let (peer, rest) = decode_body(&header, body).unwrap();
        assert_eq!(peer, v6_peer());
        assert_eq!(&rest[..], b"hi");
    }

    #[test]
    fn state_frame_round_trips() {
        let frame = encode_state(Transport::Tcp, AddressFamily::V4, 7000, v4_peer(), StateCode::Open).unwrap();
        let header = decode_header(&frame[..HEADER_SIZE]).unwrap();
        assert_eq!(header.frame_type, FrameType::State);
        let body = frame.slice(HEADER_SIZE..);
        let (peer, mut rest) = decode_body(&header, body).unwrap();
        assert_eq!(peer, v4_peer());
        assert_eq!(StateCode::try_from(rest.get_u16()).unwrap(), StateCode::Open);
    }

    #[test]
    fn oversize_payload_is_refused() {
        let payload = vec![0u8; 65530];
        let err = encode_data(Transport::Tcp, AddressFamily::V4, 1, v4_peer(), &payload).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
    }

    #[test]
    fn unknown_family_is_rejected() {
        let mut header_bytes = BytesMut::with_capacity(HEADER_SIZE);
        header_bytes.put_u16(HEADER_SIZE as u16);
        header_bytes.put_u16(FrameType::Data.wire_value());
        header_bytes.put_u16(5000);
        header_bytes.put_u8(99);
        header_bytes.put_u8(Transport::Tcp.wire_value());
        let err = decode_header(&header_bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownAddressFamily(99)));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let mut header_bytes = BytesMut::with_capacity(HEADER_SIZE);
        header_bytes.put_u16(HEADER_SIZE as u16);
        header_bytes.put_u16(7);
        header_bytes.put_u16(5000);
        header_bytes.put_u8(AddressFamily::V4.wire_value());
        header_bytes.put_u8(Transport::Tcp.wire_value());
        let err = decode_header(&header_bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownFrameType(7)));
    }
}
