use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the 65535 byte maximum")]
    FrameTooLarge(usize),
    #[error("unknown address family {0}")]
    UnknownAddressFamily(u8),
    #[error("unknown transport {0}")]
    UnknownTransport(u8),
    #[error("unknown frame type {0}")]
    UnknownFrameType(u16),
    #[error("unknown state code {0}")]
    UnknownStateCode(u16),
    #[error("frame body shorter than its header declares")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum FramerError {
    #[error("buffered data exceeded the 1 MiB cap")]
    BufferOverflow,
    #[error("line was not valid UTF-8")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upstream connection refused")]
    TransportRefused(#[source] std::io::Error),
    #[error("upstream connection lost")]
    TransportLost(#[source] std::io::Error),
    #[error("configuration metadata was not valid JSON")]
    InvalidMetadata(#[from] serde_json::Error),
    #[error("one or more requested listeners failed to bind")]
    BindFailed,
}
