use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::metainfo::InfoHash;

use super::error::PeerError;
use super::peer_id::PeerId;

/// The protocol identifier carried in every handshake.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the handshake frame: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;

/// Largest block a request may ask for.
pub const MAX_BLOCK_LEN: u32 = 16 * 1024 * 1024;

/// The fixed 68-byte handshake frame.
///
/// Layout: a `0x13` length byte, the 19-byte protocol string, 8 reserved
/// bytes (emitted zero, ignored on receipt), the info-hash, the peer-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    /// Encodes the frame for transmission.
    ///
    /// # Examples
    ///
    /// ```
    /// use bittide::peer::{Handshake, PeerId};
    /// use bittide::metainfo::InfoHash;
    ///
    /// let frame = Handshake::new(InfoHash([0u8; 20]), PeerId([b'A'; 20])).encode();
    /// assert_eq!(frame.len(), 68);
    /// assert_eq!(frame[0], 0x13);
    /// assert_eq!(&frame[1..20], b"BitTorrent protocol");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    /// Decodes a received frame.
    ///
    /// The length byte must be `0x13` and the protocol string must match;
    /// anything else is a [`PeerError::HandshakeMismatch`]. The reserved
    /// bytes are not inspected.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::ShortPayload);
        }

        if data[0] as usize != PROTOCOL.len() || &data[1..20] != PROTOCOL {
            return Err(PeerError::HandshakeMismatch);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash: InfoHash(info_hash),
            peer_id: PeerId(peer_id),
        })
    }
}

/// Message ids of the length-prefixed wire layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(PeerError::UnknownMessageId(value)),
        }
    }
}

/// One block of a piece, as named by `request` and `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// A peer wire message.
///
/// All multibyte integers are big-endian. `encode` emits the whole frame
/// including the 4-byte length prefix; `decode` consumes one whole frame.
///
/// # Examples
///
/// ```
/// use bittide::peer::Message;
///
/// let frame = Message::Request { index: 0, begin: 1, length: 5 }.encode();
/// assert_eq!(
///     frame.as_ref(),
///     &[0x00, 0x00, 0x00, 0x0D, 0x06, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 5]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A zero-length frame; refreshes the idle deadline, nothing more.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    /// Piece availability, one bit per piece, MSB-first, spare bits zero.
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Encodes the message, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
        }

        buf.freeze()
    }

    /// Decodes one complete frame, prefix included.
    ///
    /// The piece and bitfield payload sizes derive from the frame length,
    /// never from anything inside the message, so the buffers handed out
    /// are exactly as large as the frame said.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::ShortPayload);
        }

        let length = frame.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if frame.remaining() < length {
            return Err(PeerError::ShortPayload);
        }

        let id = MessageId::try_from(frame.get_u8())?;

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if length != 5 {
                    return Err(PeerError::ShortPayload);
                }
                Ok(Message::Have {
                    piece: frame.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(frame.copy_to_bytes(length - 1))),
            MessageId::Request => {
                if length != 13 {
                    return Err(PeerError::ShortPayload);
                }
                Ok(Message::Request {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
            MessageId::Piece => {
                if length < 9 {
                    return Err(PeerError::ShortPayload);
                }
                let index = frame.get_u32();
                let begin = frame.get_u32();
                let data = frame.copy_to_bytes(length - 9);
                Ok(Message::Piece { index, begin, data })
            }
            MessageId::Cancel => {
                if length != 13 {
                    return Err(PeerError::ShortPayload);
                }
                Ok(Message::Cancel {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
        }
    }
}
