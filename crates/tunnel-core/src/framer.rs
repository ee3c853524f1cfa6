//! Stream-oriented reader layered above the upstream socket. Two modes:
//! line mode (accumulate until a `\n` delimiter) and binary mode
//! (accumulate until a fixed number of bytes is available). The consumer
//! switches modes with [`LineLengthCodec::set_mode`]; line mode is
//! `size == 0`.
//!
//! Implemented as a [`tokio_util::codec::Decoder`]/[`Encoder`] pair so the
//! upstream connection can be wrapped in a single `Framed<TcpStream, _>`,
//! the same pairing the rest of this codebase uses for transport + codec.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramerError;

/// A total buffer cap applies in both modes; exceeding it is a protocol
/// violation and closes the connection.
const MAX_BUFFERED: usize = 1024 * 1024;

const DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy)]
enum Mode {
    Line,
    Binary(usize),
}

/// One item read off the upstream stream: either a bootstrap configuration
/// line, or a fixed-length binary chunk (a frame header or frame body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerItem {
    Line(String),
    Chunk(Bytes),
}

/// What the session writes back: either the bootstrap metadata line, or a
/// fully-encoded frame produced by [`crate::codec`].
#[derive(Debug, Clone)]
pub enum Outbound {
    Line(String),
    Frame(Bytes),
}

pub struct LineLengthCodec {
    mode: Mode,
}

impl LineLengthCodec {
    pub fn new() -> Self {
        Self { mode: Mode::Line }
    }

    /// `size == 0` switches to line mode; any other size switches to binary
    /// mode expecting exactly that many bytes.
    pub fn set_mode(&mut self, size: usize) {
        self.mode = if size == 0 { Mode::Line } else { Mode::Binary(size) };
    }
}

impl Default for LineLengthCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineLengthCodec {
    type Item = FramerItem;
    type Error = FramerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            Mode::Line => {
                if let Some(i) = src.iter().position(|&b| b == DELIMITER) {
                    let line = src.split_to(i);
                    // advance exactly one byte past the delimiter: the
                    // original implementation advanced two and silently ate
                    // the first byte of the next line.
                    src.advance(1);
                    let line = String::from_utf8(line.to_vec()).map_err(|_| FramerError::InvalidUtf8)?;
                    return Ok(Some(FramerItem::Line(line)));
                }
                if src.len() > MAX_BUFFERED {
                    return Err(FramerError::BufferOverflow);
                }
                Ok(None)
            }
            Mode::Binary(size) => {
                if src.len() >= size {
                    let chunk = src.split_to(size).freeze();
                    return Ok(Some(FramerItem::Chunk(chunk)));
                }
                if src.len() > MAX_BUFFERED {
                    return Err(FramerError::BufferOverflow);
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Outbound> for LineLengthCodec {
    type Error = FramerError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Outbound::Line(line) => {
                dst.extend_from_slice(line.as_bytes());
                dst.extend_from_slice(&[DELIMITER]);
            }
            Outbound::Frame(bytes) => dst.extend_from_slice(&bytes),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_mode_emits_up_to_delimiter_and_advances_one_byte() {
        let mut codec = LineLengthCodec::new();
        let mut buf = BytesMut::from(&b"hello\nworld"[..]);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(item, FramerItem::Line("hello".to_string()));
        assert_eq!(&buf[..], b"world");
    }

    #[test]
    fn line_mode_waits_for_more_data() {
        let mut codec = LineLengthCodec::new();
        let mut buf = BytesMut::from(&b"partial"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn binary_mode_emits_exact_size_chunks() {
        let mut codec = LineLengthCodec::new();
        codec.set_mode(4);
        let mut buf = BytesMut::from(&b"abcdefgh"[..]);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(item, FramerItem::Chunk(Bytes::from_static(b"abcd")));
        assert_eq!(&buf[..], b"efgh");
    }

    #[test]
    fn chunking_is_invariant_to_arbitrary_split_points() {
        // deliver the same bytes one at a time instead of all at once; the
        // sequence of emitted items must be identical either way.
        let whole = b"ab\ncdef".to_vec();
        let mut codec_whole = LineLengthCodec::new();
        let mut buf_whole = BytesMut::from(&whole[..]);
        let mut items_whole = Vec::new();
        while let Some(item) = codec_whole.decode(&mut buf_whole).unwrap() {
            items_whole.push(item);
        }

        let mut codec_chunked = LineLengthCodec::new();
        let mut buf_chunked = BytesMut::new();
        let mut items_chunked = Vec::new();
        for byte in &whole {
            buf_chunked.extend_from_slice(&[*byte]);
            while let Some(item) = codec_chunked.decode(&mut buf_chunked).unwrap() {
                items_chunked.push(item);
            }
        }

        assert_eq!(items_whole, items_chunked);
    }

    #[test]
    fn overflow_in_line_mode_is_an_error() {
        let mut codec = LineLengthCodec::new();
        let mut buf = BytesMut::from(vec![b'a'; MAX_BUFFERED + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FramerError::BufferOverflow));
    }

    #[test]
    fn overflow_in_binary_mode_is_an_error() {
        let mut codec = LineLengthCodec::new();
        codec.set_mode(MAX_BUFFERED + 2);
        let mut buf = BytesMut::from(vec![b'a'; MAX_BUFFERED + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FramerError::BufferOverflow));
    }
}
