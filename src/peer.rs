//! Peer wire protocol (BEP-3)
//!
//! The 68-byte handshake, the ten length-prefixed message kinds, a
//! stream-generic framed transport, and the per-peer session state
//! machine with its keep-alive and idle-death timers.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{BlockRequest, Handshake, Message, MessageId, HANDSHAKE_LEN, MAX_BLOCK_LEN, PROTOCOL};
pub use peer_id::PeerId;
pub use session::{
    spawn, ChokeState, PeerEvent, SessionEvent, SessionHandle, SessionKey, SessionParams,
};
pub use transport::{FrameReader, FrameWriter, PeerTransport};

#[cfg(test)]
mod tests;
