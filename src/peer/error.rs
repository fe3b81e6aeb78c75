use thiserror::Error;

/// Errors raised by the peer wire protocol and session layer.
///
/// Every case is fatal to the session it happens on and to nothing else.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote handshake did not match what we sent or expected.
    #[error("handshake mismatch")]
    HandshakeMismatch,

    /// An inbound peer asked for a torrent we do not have.
    #[error("unknown info hash")]
    UnknownInfoHash,

    /// A frame ended before its payload was complete.
    #[error("short payload")]
    ShortPayload,

    /// A message id outside the protocol.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// The peer broke a protocol rule.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A deadline expired; the payload names the stage.
    #[error("timeout during {0}")]
    Timeout(&'static str),

    /// The stream was closed by the remote end.
    #[error("connection closed")]
    ConnectionClosed,
}
